//! `GET /health` (SPEC_FULL.md §6.1), grounded in the donor's
//! `HealthResponse{status, version, database, cache}` shape. The LangSmith
//! field the donor reports is dropped: LLM observability is out of scope
//! here, and a field that always reads "not configured" is noise.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use bi_core::cache::CacheStats;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub cache: Vec<CacheStats>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = if state.orchestrator.db.ping().await {
        "connected"
    } else {
        "unreachable"
    };

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        database,
        cache: state.orchestrator.cache_stats(),
    })
}
