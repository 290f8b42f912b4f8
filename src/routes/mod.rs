pub mod api;

use sqlx::PgPool;

use crate::scraping::ScrapeSettings;

/// Shared by every handler. Each scrape request starts its own session.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub settings: ScrapeSettings,
}
