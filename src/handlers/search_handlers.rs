use crate::{errors::AppError, state::AppState};
use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET `/api/search?q=` — public substring search over names.
pub async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let results = state.search.search(&q.q, q.limit, q.offset).await?;
    Ok(Json(results))
}
