use axum::Json;
use axum::extract::{Query, State};

use crate::error::AppError;
use crate::models::ausbildung::{Ausbildung, AusbildungFilters};
use crate::routes::AppState;

/// GET /api/v1/ausbildungen?userId=...&source=...
pub async fn list(
    State(state): State<AppState>,
    Query(filters): Query<AusbildungFilters>,
) -> Result<Json<Vec<Ausbildung>>, AppError> {
    if filters.user_id.trim().is_empty() {
        return Err(AppError::BadRequest("userId is required".to_string()));
    }
    let rows = Ausbildung::list(&state.pool, &filters).await?;
    Ok(Json(rows))
}
