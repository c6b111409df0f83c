//! The streaming response protocol (SPEC_FULL.md §4.7): a strictly-ordered
//! `event: <type>\ndata: <json>\n\n` sequence over a non-buffering HTTP
//! response, closed by the literal `[DONE]` sentinel.
//!
//! One `Orchestrator::run_with_progress` call drives a single task that
//! pushes frames onto a bounded channel; the SSE body is whatever the
//! channel yields, so a client disconnect (the receiver side of the
//! `Sse<Body>` future getting dropped by axum) simply stops the channel
//! being drained, and the producer task's next `send` fails and unwinds —
//! the cooperative cancellation SPEC_FULL.md §5 asks for, with no extra
//! cancellation token required.

use axum::response::sse::Event;
use bi_core::model::{DashboardSpec, DataPayload, StepRecord};
use serde::Serialize;
use serde_json::json;

pub const CHANNEL_CAPACITY: usize = 32;

#[derive(Serialize)]
struct StartPayload<'a> {
    trace_id: String,
    message_id: String,
    graph_version: &'a str,
}

pub fn start(trace_id: &str, message_id: &str) -> Event {
    Event::default().event("start").json_data(StartPayload {
        trace_id: trace_id.to_string(),
        message_id: message_id.to_string(),
        graph_version: "1",
    }).expect("start payload always serializes")
}

#[derive(Serialize)]
struct DataTracePayload<'a> {
    trace_id: &'a str,
    thread_id: &'a str,
}

pub fn data_trace(trace_id: &str, thread_id: &str) -> Event {
    Event::default()
        .event("data-trace")
        .json_data(DataTracePayload { trace_id, thread_id })
        .expect("data-trace payload always serializes")
}

pub fn text_start(text_id: &str) -> Event {
    Event::default()
        .event("text-start")
        .json_data(json!({ "id": text_id }))
        .expect("text-start payload always serializes")
}

pub fn agent_step(step: &StepRecord) -> Event {
    Event::default()
        .event("data-agent_step")
        .json_data(json!({
            "step": step.node,
            "status": step.status,
            "timestamp": step.timestamp,
            "detail": step.detail,
        }))
        .expect("agent step always serializes")
}

pub fn dashboard(spec: &DashboardSpec) -> Event {
    Event::default()
        .event("data-dashboard")
        .json_data(spec)
        .expect("dashboard spec always serializes")
}

pub fn payload(payload: &DataPayload) -> Event {
    Event::default()
        .event("data-payload")
        .json_data(payload)
        .expect("data payload always serializes")
}

pub fn text_delta(text_id: &str, delta: &str) -> Event {
    Event::default()
        .event("text-delta")
        .json_data(json!({ "id": text_id, "delta": delta }))
        .expect("text-delta payload always serializes")
}

pub fn text_end(text_id: &str) -> Event {
    Event::default()
        .event("text-end")
        .json_data(json!({ "id": text_id }))
        .expect("text-end payload always serializes")
}

#[derive(Serialize)]
struct FinishPayload<'a> {
    #[serde(rename = "finishReason")]
    finish_reason: &'a str,
    #[serde(rename = "messageId")]
    message_id: &'a str,
}

pub fn finish(finish_reason: &str, message_id: &str) -> Event {
    Event::default()
        .event("finish")
        .json_data(FinishPayload { finish_reason, message_id })
        .expect("finish payload always serializes")
}

/// The literal sentinel that closes the stream. Unlike every other frame
/// this is not JSON and carries no `event:` line — a plain `data: [DONE]`
/// message event, matching the convention the client's SSE parser already
/// understands from other streaming backends.
pub fn done() -> Event {
    Event::default().data("[DONE]")
}

/// Splits narrative text into a handful of word-group chunks so
/// `text-delta` reads as progressive streaming rather than one giant frame,
/// without depending on true token-level incremental generation.
pub fn chunk_narrative(text: &str) -> Vec<String> {
    const WORDS_PER_CHUNK: usize = 12;
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    words
        .chunks(WORDS_PER_CHUNK)
        .map(|chunk| chunk.join(" ") + " ")
        .collect()
}
