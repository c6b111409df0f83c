//! `POST /cache/invalidate` (SPEC_FULL.md §6.1): drops all per-node TTL
//! caches, or just one when a `?node=` query parameter names it. Grounded in
//! the donor's `invalidate_cache(node_name: Optional[str])` admin endpoint.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InvalidateParams {
    pub node: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheInvalidateResponse {
    pub status: &'static str,
    pub message: String,
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> Json<CacheInvalidateResponse> {
    state
        .orchestrator
        .invalidate_cache(params.node.as_deref());

    let message = match &params.node {
        Some(node) => format!("Cache `{node}` invalidated"),
        None => "All caches invalidated".to_string(),
    };
    Json(CacheInvalidateResponse {
        status: "ok",
        message,
    })
}
