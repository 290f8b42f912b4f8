use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::scraping::navigator::{DEFAULT_USER_AGENT, NavigatorKind};
use crate::scraping::retry::RetryPolicy;
use crate::scraping::runner::{DEFAULT_NUM_PAGES, ScrapeRequest};
use crate::scraping::ScrapeSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "ausbildung-scraper", about = "Apprenticeship posting scraper for ausbildung.de and azubi.de")]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Run database migrations on startup
    #[arg(long, env = "RUN_MIGRATIONS", default_value = "true")]
    pub run_migrations: bool,

    /// Emit JSON log lines instead of the human-readable format
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(flatten)]
    pub scraping: ScrapingArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Timing and identity of outgoing scrape traffic.
#[derive(clap::Args, Debug, Clone)]
pub struct ScrapingArgs {
    /// Per-page navigation timeout in milliseconds
    #[arg(long, env = "SCRAPE_TIMEOUT_MS", default_value = "20000")]
    pub timeout_ms: u64,

    /// Pause after each posting in milliseconds
    #[arg(long, env = "SCRAPE_REQUEST_DELAY_MS", default_value = "1000")]
    pub request_delay_ms: u64,

    /// Pause between result pages in milliseconds
    #[arg(long, env = "SCRAPE_PAGE_DELAY_MS", default_value = "2000")]
    pub page_delay_ms: u64,

    /// Attempts per page load, including the first
    #[arg(long, env = "SCRAPE_MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds, doubled on every retry
    #[arg(long, env = "SCRAPE_RETRY_INITIAL_DELAY_MS", default_value = "1000")]
    pub retry_initial_delay_ms: u64,

    #[arg(long, env = "SCRAPE_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Page loader: a headless Chromium, or plain HTTP without rendering
    #[arg(long, env = "SCRAPE_BROWSER", value_enum, default_value_t = NavigatorKind::Chromium)]
    pub browser: NavigatorKind,

    /// Chromium executable, searched for in the usual places when unset
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,
}

impl ScrapingArgs {
    pub fn settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            timeout: Duration::from_millis(self.timeout_ms),
            request_delay: Duration::from_millis(self.request_delay_ms),
            page_delay: Duration::from_millis(self.page_delay_ms),
            retry: RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_initial_delay_ms)),
            user_agent: self.user_agent.clone(),
            navigator: self.browser,
            chrome_path: self.chrome_path.clone(),
        }
    }
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the web server (default when no subcommand given)
    Serve {
        /// Listen address
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen_addr: String,
    },
    /// Run a single scrape and print the summary as JSON
    Scrape(ScrapeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ScrapeArgs {
    #[arg(long)]
    pub search_term: String,

    /// Leave empty for a nationwide search
    #[arg(long, default_value = "")]
    pub location: String,

    #[arg(long, default_value_t = DEFAULT_NUM_PAGES)]
    pub pages: u32,

    /// Portal to scrape: ausbildung or azubi
    #[arg(long, default_value = "ausbildung")]
    pub website: String,

    /// Owner of the stored postings
    #[arg(long)]
    pub user_id: String,

    /// Only keep postings starting in this year
    #[arg(long)]
    pub start_year: Option<i32>,
}

impl From<ScrapeArgs> for ScrapeRequest {
    fn from(args: ScrapeArgs) -> Self {
        ScrapeRequest {
            search_term: args.search_term,
            location: args.location,
            num_pages: args.pages,
            website: args.website,
            user_id: args.user_id,
            start_year: args.start_year,
        }
    }
}

impl Config {
    /// Resolve the command, defaulting to Serve if none specified.
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }
}
