//! Page loading for a scrape run.
//!
//! The default session is [`ChromiumNavigator`](crate::scraping::chromium::ChromiumNavigator),
//! a headless browser that renders client-side content. [`HttpNavigator`] is
//! the lightweight fallback: one reqwest client with the same user agent and
//! timeout, returning the server HTML as is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::scraping::error::ScrapeError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// A fetched document and the URL it was served from after redirects.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub url: Url,
    pub html: String,
}

/// Which [`Navigator`] a run launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NavigatorKind {
    #[default]
    Chromium,
    Http,
}

/// A browsing session owned by exactly one run.
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Load `url`. With `wait_for`, give the page until the timeout to
    /// render a match for that selector; a page without one is still returned.
    async fn goto(&self, url: &str, wait_for: Option<&str>) -> Result<LoadedPage, ScrapeError>;

    /// Release the session. Called once when the run ends, however it ends.
    async fn close(&self) -> Result<(), ScrapeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Image,
    Stylesheet,
    Font,
    Media,
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Document => "document",
            ResourceKind::Image => "image",
            ResourceKind::Stylesheet => "stylesheet",
            ResourceKind::Font => "font",
            ResourceKind::Media => "media",
            ResourceKind::Other => "other",
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            ResourceKind::Image | ResourceKind::Stylesheet | ResourceKind::Font | ResourceKind::Media
        )
    }

    /// Guess from the path extension.
    pub fn from_url(url: &Url) -> Self {
        let path = url.path().to_ascii_lowercase();
        let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        match ext {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "avif" | "bmp" => ResourceKind::Image,
            "css" => ResourceKind::Stylesheet,
            "woff" | "woff2" | "ttf" | "otf" | "eot" => ResourceKind::Font,
            "mp4" | "webm" | "ogg" | "mp3" | "wav" | "m4a" | "mov" => ResourceKind::Media,
            _ => ResourceKind::Document,
        }
    }

    pub fn from_content_type(content_type: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if mime.starts_with("image/") {
            ResourceKind::Image
        } else if mime == "text/css" {
            ResourceKind::Stylesheet
        } else if mime.starts_with("font/") || mime.contains("font-woff") {
            ResourceKind::Font
        } else if mime.starts_with("audio/") || mime.starts_with("video/") {
            ResourceKind::Media
        } else {
            ResourceKind::Document
        }
    }
}

pub struct HttpNavigator {
    client: reqwest::Client,
    timeout: Duration,
    closed: AtomicBool,
}

impl HttpNavigator {
    pub fn launch(user_agent: &str, timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::BrowserInit(format!("Failed to build HTTP client: {e}")))?;

        tracing::debug!("Browser session ready (timeout {}ms)", timeout.as_millis());
        Ok(Self {
            client,
            timeout,
            closed: AtomicBool::new(false),
        })
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> ScrapeError {
        if e.is_timeout() {
            ScrapeError::Timeout {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            ScrapeError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Navigator for HttpNavigator {
    // Server HTML is final, so there is nothing to wait for.
    async fn goto(&self, url: &str, _wait_for: Option<&str>) -> Result<LoadedPage, ScrapeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScrapeError::Navigation {
                url: url.to_string(),
                message: "browser session already closed".to_string(),
            });
        }

        let parsed = Url::parse(url).map_err(|e| ScrapeError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let kind = ResourceKind::from_url(&parsed);
        if kind.is_blocked() {
            return Err(ScrapeError::BlockedResource {
                url: url.to_string(),
                kind: kind.as_str(),
            });
        }

        let resp = self
            .client
            .get(parsed)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "de-DE,de;q=0.9,en;q=0.8")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Sec-Fetch-Site", "none")
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        if !resp.status().is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        if let Some(content_type) = resp.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            let kind = ResourceKind::from_content_type(content_type);
            if kind.is_blocked() {
                return Err(ScrapeError::BlockedResource {
                    url: url.to_string(),
                    kind: kind.as_str(),
                });
            }
        }

        let final_url = resp.url().clone();
        let html = resp.text().await.map_err(|e| self.request_error(url, e))?;

        Ok(LoadedPage { url: final_url, html })
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Browser session closed");
        }
        Ok(())
    }
}
