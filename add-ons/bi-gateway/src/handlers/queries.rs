//! `GET /queries` (SPEC_FULL.md §6.1): exposes the allowlist's catalog so a
//! front end (or a curious operator) can see exactly which SQL templates this
//! gateway is willing to run, without ever seeing the SQL itself.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

use bi_core::Allowlist;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QueriesResponse {
    pub queries: HashMap<String, String>,
}

pub async fn list_queries(State(_state): State<AppState>) -> Json<QueriesResponse> {
    Json(QueriesResponse {
        queries: Allowlist::available_queries(),
    })
}
