//! `POST /insights/run` and `POST /insights/stream` (SPEC_FULL.md §6.1): the
//! programmatic sibling of `/chat/stream` for callers that want a single
//! JSON response, or the same SSE protocol without the chat framing
//! conventions (no `conversation_id` round-trip expected).

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::State;
use axum::response::sse::Sse;
use axum::Json;
use serde::{Deserialize, Serialize};

use bi_core::model::{DashboardSpec, DataPayload, Request};

use super::chat::{stream_events, BoxedEventStream};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InsightsRequest {
    pub question: String,
    #[serde(default)]
    pub date_from: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub date_to: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub filters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct InsightsResponse {
    pub success: bool,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_spec: Option<DashboardSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_payload: Option<DataPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_meta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: f64,
}

pub async fn insights_run(
    State(state): State<AppState>,
    Json(req): Json<InsightsRequest>,
) -> Json<InsightsResponse> {
    let request = Request {
        question: req.question,
        date_from: req.date_from,
        date_to: req.date_to,
        filters: req.filters,
        conversation_id: None,
        user_id: None,
    };

    let started = Instant::now();
    let outcome = state.orchestrator.run(request).await;
    let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let data_meta = outcome
        .payload
        .as_ref()
        .map(|p| serde_json::json!({ "datasets": p.datasets_meta }));

    Json(InsightsResponse {
        success: outcome.error.is_none(),
        trace_id: outcome.trace_id.to_string(),
        dashboard_spec: outcome.spec,
        data_payload: outcome.payload,
        data_meta,
        error: outcome.error.map(|e| e.to_string()),
        execution_time_ms,
    })
}

pub async fn insights_stream(
    State(state): State<AppState>,
    Json(req): Json<InsightsRequest>,
) -> Sse<BoxedEventStream> {
    let request = Request {
        question: req.question,
        date_from: req.date_from,
        date_to: req.date_to,
        filters: req.filters,
        conversation_id: None,
        user_id: None,
    };
    stream_events(state, request)
}
