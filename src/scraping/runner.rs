//! One scrape run: search pages, detail pages, filters and persistence.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::scraping::error::ScrapeError;
use crate::scraping::extract::{PageDocument, extract_posting};
use crate::scraping::chromium::ChromiumNavigator;
use crate::scraping::navigator::{DEFAULT_USER_AGENT, HttpNavigator, Navigator, NavigatorKind};
use crate::scraping::retry::{RetryPolicy, with_retry_if};
use crate::scraping::sites::{SiteAdapter, get_adapter};
use crate::scraping::store::{JobStore, SaveOutcome, save_posting};
use crate::scraping::validation::{sanitize_job_data, validate_job_data};

pub const DEFAULT_NUM_PAGES: u32 = 3;
pub const MAX_NUM_PAGES: u32 = 10;
const LOGGED_ERRORS: usize = 5;

/// Per-run parameters supplied by the caller.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub search_term: String,
    /// Empty for a nationwide search.
    pub location: String,
    pub num_pages: u32,
    pub website: String,
    pub user_id: String,
    /// Only keep postings whose start date mentions this year.
    pub start_year: Option<i32>,
}

/// Timing knobs shared by every run of a process.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub timeout: Duration,
    pub request_delay: Duration,
    pub page_delay: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
    pub navigator: NavigatorKind,
    /// Chromium binary; searched for when unset.
    pub chrome_path: Option<PathBuf>,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(20_000),
            request_delay: Duration::from_millis(1000),
            page_delay: Duration::from_millis(2000),
            retry: RetryPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            navigator: NavigatorKind::default(),
            chrome_path: None,
        }
    }
}

/// Start the session `settings` asks for.
pub async fn launch_navigator(settings: &ScrapeSettings) -> Result<Arc<dyn Navigator>, ScrapeError> {
    let navigator: Arc<dyn Navigator> = match settings.navigator {
        NavigatorKind::Chromium => Arc::new(
            ChromiumNavigator::launch(&settings.user_agent, settings.timeout, settings.chrome_path.as_deref()).await?,
        ),
        NavigatorKind::Http => Arc::new(HttpNavigator::launch(&settings.user_agent, settings.timeout)?),
    };
    Ok(navigator)
}

/// A failure recorded against a search page or a posting URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub error: String,
}

impl RunError {
    fn for_url(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: Some(url.to_string()),
            page: None,
            error: error.into(),
        }
    }

    fn for_page(page: u32, error: impl Into<String>) -> Self {
        Self {
            url: None,
            page: Some(page),
            error: error.into(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.url, self.page) {
            (Some(url), _) => write!(f, "{url}: {}", self.error),
            (None, Some(page)) => write!(f, "page {page}: {}", self.error),
            (None, None) => f.write_str(&self.error),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeSummary {
    pub saved_jobs: usize,
    pub total_processed_urls: usize,
    pub errors: Vec<RunError>,
}

/// Mutable bookkeeping for a single run. Never outlives it.
#[derive(Default)]
struct RunState {
    processed: HashSet<String>,
    saved_jobs: usize,
    created: usize,
    updated: usize,
    errors: Vec<RunError>,
}

struct Progress {
    total: u32,
    started: Instant,
}

impl Progress {
    fn new(total: u32) -> Self {
        Self {
            total,
            started: Instant::now(),
        }
    }

    fn log(&self, current: u32) {
        let pct = (current * 100).checked_div(self.total).unwrap_or(100);
        tracing::info!(
            "Scraping pages: {current}/{} ({pct}%), {}s elapsed",
            self.total,
            self.started.elapsed().as_secs()
        );
    }
}

async fn release(navigator: Arc<dyn Navigator>, store: Arc<dyn JobStore>) {
    if let Err(e) = navigator.close().await {
        tracing::warn!("Failed to close browser session: {e}");
    }
    store.close().await;
}

/// Owns the run's navigator and store until they are released.
///
/// If the run future is dropped first, the release is spawned onto the
/// runtime from `Drop`.
struct ReleaseGuard {
    resources: Option<(Arc<dyn Navigator>, Arc<dyn JobStore>)>,
}

impl ReleaseGuard {
    fn new(navigator: Arc<dyn Navigator>, store: Arc<dyn JobStore>) -> Self {
        Self {
            resources: Some((navigator, store)),
        }
    }

    async fn release(mut self) {
        if let Some((navigator, store)) = self.resources.take() {
            release(navigator, store).await;
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some((navigator, store)) = self.resources.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("Run dropped before completion, releasing browser session");
                handle.spawn(release(navigator, store));
            }
            Err(_) => tracing::error!("Run dropped outside a runtime, browser session not released"),
        }
    }
}

async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

pub struct Scraper {
    run_id: Uuid,
    request: ScrapeRequest,
    settings: ScrapeSettings,
    adapter: &'static SiteAdapter,
    store: Arc<dyn JobStore>,
}

impl Scraper {
    /// Fails only when the requested website has no adapter.
    pub fn new(
        mut request: ScrapeRequest,
        settings: ScrapeSettings,
        store: Arc<dyn JobStore>,
    ) -> Result<Self, ScrapeError> {
        let adapter = get_adapter(&request.website)?;
        request.num_pages = request.num_pages.clamp(1, MAX_NUM_PAGES);
        Ok(Self {
            run_id: Uuid::new_v4(),
            request,
            settings,
            adapter,
            store,
        })
    }

    /// Walk every requested page, then release the navigator and the store.
    /// Ctrl-C ends the walk early; the summary covers what was done.
    pub async fn run(self, navigator: Arc<dyn Navigator>) -> ScrapeSummary {
        self.run_until(navigator, interrupt_signal()).await
    }

    /// [`run`](Self::run) with a caller-supplied interrupt.
    pub async fn run_until(self, navigator: Arc<dyn Navigator>, interrupt: impl Future<Output = ()>) -> ScrapeSummary {
        let started = Instant::now();
        let location = match self.request.location.as_str() {
            "" => "All Germany",
            other => other,
        };
        tracing::info!(
            "Run {} started: {:?} in {location} on {}, {} pages, start year {:?}",
            self.run_id,
            self.request.search_term,
            self.adapter.site,
            self.request.num_pages,
            self.request.start_year
        );

        let guard = ReleaseGuard::new(navigator.clone(), self.store.clone());
        let mut state = RunState::default();
        let interrupted = tokio::select! {
            biased;
            _ = interrupt => true,
            _ = self.scrape_pages(navigator.as_ref(), &mut state) => false,
        };
        if interrupted {
            tracing::warn!(
                "Run {} interrupted after {} URLs, releasing browser session",
                self.run_id,
                state.processed.len()
            );
        }
        guard.release().await;

        let summary = ScrapeSummary {
            saved_jobs: state.saved_jobs,
            total_processed_urls: state.processed.len(),
            errors: state.errors,
        };
        self.log_summary(&summary, state.created, state.updated, started.elapsed());
        summary
    }

    async fn scrape_pages(&self, navigator: &dyn Navigator, state: &mut RunState) {
        let total = self.request.num_pages;
        let progress = Progress::new(total);

        for page in 1..=total {
            progress.log(page);

            let links = match self.collect_links(navigator, page).await {
                Ok(links) => links,
                Err(e) => {
                    tracing::error!("Error scraping page {page}: {e}");
                    state.errors.push(RunError::for_page(page, e.to_string()));
                    continue;
                }
            };

            if links.is_empty() {
                tracing::info!("No job links found on page {page}, stopping");
                break;
            }
            tracing::info!("Found {} job links on page {page}", links.len());

            for url in links {
                if !state.processed.insert(url.clone()) {
                    tracing::debug!("Already processed {url}");
                    continue;
                }
                self.process_url(navigator, &url, state).await;
                tokio::time::sleep(self.settings.request_delay).await;
            }

            if page < total {
                tokio::time::sleep(self.settings.page_delay).await;
            }
        }
    }

    async fn collect_links(&self, navigator: &dyn Navigator, page: u32) -> Result<Vec<String>, ScrapeError> {
        let search_url = self
            .adapter
            .search_url(&self.request.search_term, &self.request.location, page);
        tracing::debug!("Loading search page {search_url}");

        let loaded = with_retry_if(&self.settings.retry, "search page", ScrapeError::is_transient, || {
            navigator.goto(&search_url, Some(self.adapter.job_link_selector))
        })
        .await?;
        Ok(PageDocument::parse(&loaded).links(self.adapter.job_link_selector))
    }

    async fn process_url(&self, navigator: &dyn Navigator, url: &str, state: &mut RunState) {
        let loaded = match with_retry_if(&self.settings.retry, "detail page", ScrapeError::is_transient, || {
            navigator.goto(url, None)
        })
        .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::error!("Error scraping {url}: {e}");
                state.errors.push(RunError::for_url(url, e.to_string()));
                return;
            }
        };

        let job = extract_posting(&loaded, self.adapter);
        let report = validate_job_data(&job);
        if !report.is_valid() {
            tracing::warn!("Invalid job data for {url}: {}", report.errors.join(", "));
            return;
        }
        let job = sanitize_job_data(job);

        if let Some(year) = self.request.start_year
            && !job.starts_in(year)
        {
            tracing::info!("Skipping {} (start date {} is not in {year})", job.title, job.start_date);
            return;
        }

        if !job.has_contact_email() {
            tracing::info!("Skipping {} at {}: no email found", job.title, job.institution);
            return;
        }

        match save_posting(self.store.as_ref(), &job, &self.request.user_id).await {
            Ok(outcome) => {
                state.saved_jobs += 1;
                match outcome {
                    SaveOutcome::Created => state.created += 1,
                    SaveOutcome::Updated => state.updated += 1,
                }
                tracing::info!(
                    "Scraped: [{}] [{}] [{}] [{}] [{}]",
                    job.title,
                    job.institution,
                    job.start_date,
                    job.vacancies,
                    job.source
                );
            }
            Err(e) => {
                tracing::error!(
                    "Failed to save {:?} at {:?} ({url}): {e}",
                    job.title,
                    job.institution
                );
                state.errors.push(RunError::for_url(url, format!("Failed to save: {e}")));
            }
        }
    }

    fn log_summary(&self, summary: &ScrapeSummary, created: usize, updated: usize, elapsed: Duration) {
        tracing::info!(
            "Run {} completed: {} saved ({created} new, {updated} updated), {} URLs processed, {} errors in {}s",
            self.run_id,
            summary.saved_jobs,
            summary.total_processed_urls,
            summary.errors.len(),
            elapsed.as_secs()
        );
        for error in summary.errors.iter().take(LOGGED_ERRORS) {
            tracing::warn!("  {error}");
        }
        if summary.errors.len() > LOGGED_ERRORS {
            tracing::warn!("  ... and {} more errors", summary.errors.len() - LOGGED_ERRORS);
        }
    }
}

/// Run a scrape with a fresh browser session.
///
/// Only an unknown website or a session that cannot start is an error;
/// everything else lands in [`ScrapeSummary::errors`].
pub async fn scrape(
    request: ScrapeRequest,
    settings: ScrapeSettings,
    store: Arc<dyn JobStore>,
) -> Result<ScrapeSummary, ScrapeError> {
    let started = match Scraper::new(request, settings, store.clone()) {
        Ok(scraper) => launch_navigator(&scraper.settings).await.map(|nav| (scraper, nav)),
        Err(e) => Err(e),
    };
    match started {
        Ok((scraper, navigator)) => Ok(scraper.run(navigator).await),
        Err(e) => {
            store.close().await;
            Err(e)
        }
    }
}
