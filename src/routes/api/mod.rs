pub mod ausbildungen;
pub mod scrape;

use axum::Router;
use axum::routing::{get, post};

use crate::routes::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/scrape", post(scrape::start))
        .route("/ausbildungen", get(ausbildungen::list))
        .with_state(state);

    Router::new().nest("/api/v1", api)
}
