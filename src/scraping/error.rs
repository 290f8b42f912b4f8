use thiserror::Error;

/// Failures raised by the scraping engine.
///
/// Only `UnknownSite` and `BrowserInit` end a run; everything else is
/// recorded against the page or URL that produced it.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Unsupported website: {0}. Use 'ausbildung' or 'azubi'.")]
    UnknownSite(String),

    #[error("Failed to initialize browser session: {0}")]
    BrowserInit(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Navigation to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Blocked {kind} resource: {url}")]
    BlockedResource { url: String, kind: &'static str },

    #[error("Browser session error: {0}")]
    Session(String),
}

impl ScrapeError {
    /// Whether another attempt at the same URL could succeed.
    ///
    /// Navigation failures, timeouts, throttling and server errors are
    /// transient. Client errors and blocked resources are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Navigation { .. } | ScrapeError::Timeout { .. } => true,
            ScrapeError::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            ScrapeError::UnknownSite(_)
            | ScrapeError::BrowserInit(_)
            | ScrapeError::BlockedResource { .. }
            | ScrapeError::Session(_) => false,
        }
    }
}
