use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::routes::AppState;
use crate::scraping::runner::{DEFAULT_NUM_PAGES, MAX_NUM_PAGES};
use crate::scraping::sites::get_adapter;
use crate::scraping::store::PgJobStore;
use crate::scraping::{ScrapeRequest, ScrapeSummary, scrape};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeInput {
    pub search_term: Option<String>,
    pub location: Option<String>,
    pub num_pages: Option<u32>,
    pub website: Option<String>,
    pub user_id: Option<String>,
    pub start_year: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: ScrapeSummary,
    pub website: String,
    pub success: bool,
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{name} is required")))
}

impl TryFrom<ScrapeInput> for ScrapeRequest {
    type Error = AppError;

    fn try_from(input: ScrapeInput) -> Result<Self, Self::Error> {
        let search_term = required(input.search_term, "searchTerm")?;
        let user_id = required(input.user_id, "userId")?;
        let website = input
            .website
            .map(|w| w.trim().to_ascii_lowercase())
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| "ausbildung".to_string());
        get_adapter(&website)?;

        Ok(ScrapeRequest {
            search_term,
            location: input.location.unwrap_or_default().trim().to_string(),
            num_pages: input.num_pages.unwrap_or(DEFAULT_NUM_PAGES).clamp(1, MAX_NUM_PAGES),
            website,
            user_id,
            start_year: input.start_year,
        })
    }
}

fn completion_message(website: &str, summary: &ScrapeSummary) -> String {
    let mut message = format!("Scraping completed successfully from {website}.de.");
    if !summary.errors.is_empty() {
        message.push_str(&format!(
            " However, {} errors occurred during the process.",
            summary.errors.len()
        ));
    }
    message
}

/// POST /api/v1/scrape
///
/// Answers once the scrape is done. The run lives on its own task, so a
/// client that disconnects early does not cut it short.
/// Per-posting failures are reported in `errors` with a 200 status.
pub async fn start(
    State(state): State<AppState>,
    Json(input): Json<ScrapeInput>,
) -> Result<Json<ScrapeResponse>, AppError> {
    let request = ScrapeRequest::try_from(input)?;
    let website = request.website.clone();
    let store = Arc::new(PgJobStore::shared(state.pool.clone()));
    let run = tokio::spawn(scrape(request, state.settings.clone(), store));
    let summary = run
        .await
        .map_err(|e| AppError::Internal(format!("Scrape task failed: {e}")))??;

    Ok(Json(ScrapeResponse {
        message: completion_message(&website, &summary),
        summary,
        website,
        success: true,
    }))
}
