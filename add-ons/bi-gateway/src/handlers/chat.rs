//! `POST /chat/stream`: the conversational surface (SPEC_FULL.md §4.7, §8
//! scenario 1). Every question — greeting, clarification, or full dashboard —
//! goes through the same SSE framing; the difference is only which optional
//! frames (`data-dashboard`, `data-payload`) appear between `text-start` and
//! `text-end`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use bi_core::model::Request;
use bi_core::RunOutcome;

use crate::sse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub date_from: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub date_to: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub filters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

pub type BoxedEventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Sse<BoxedEventStream> {
    let thread_id = req
        .conversation_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let request = Request {
        question: req.question,
        date_from: req.date_from,
        date_to: req.date_to,
        filters: req.filters,
        conversation_id: Some(thread_id),
        user_id: req.user_id,
    };

    stream_events(state, request)
}

/// Streams one orchestrator run. The run happens on a spawned task that owns
/// the channel's sending half; `data-agent_step` frames are pushed live as
/// each node transitions, everything else is assembled once the run
/// finishes. If the client disconnects, axum drops the `Sse` body's future,
/// `rx` is dropped with it, and the task's next `tx.send` fails and unwinds —
/// no separate cancellation signal is threaded through. Shared by
/// `/chat/stream` and `/insights/stream`, which speak the same event
/// protocol over different request shapes (SPEC_FULL.md §6.1).
pub fn stream_events(state: AppState, request: Request) -> Sse<BoxedEventStream> {
    let message_id = uuid::Uuid::new_v4().to_string();
    let thread_id = request
        .conversation_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (tx, rx) = mpsc::channel::<Event>(sse::CHANNEL_CAPACITY);

    // Sent via try_send rather than threading an extra await through a sync
    // function: the channel is freshly created with headroom for these three
    // frames, so backpressure cannot apply yet.
    let _ = tx.try_send(sse::start(&message_id, &message_id));
    let _ = tx.try_send(sse::data_trace(&message_id, &thread_id));
    let _ = tx.try_send(sse::text_start(&message_id));

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let outcome = orchestrator
            .run_with_progress(request, move |step| {
                let _ = progress_tx.try_send(sse::agent_step(step));
            })
            .await;

        if let Some(spec) = &outcome.spec {
            let _ = tx.send(sse::dashboard(spec)).await;
        }
        if let Some(payload) = &outcome.payload {
            let _ = tx.send(sse::payload(payload)).await;
        }

        let narrative = narrative_text(&outcome);
        for chunk in sse::chunk_narrative(&narrative) {
            let _ = tx.send(sse::text_delta(&message_id, &chunk)).await;
        }
        let _ = tx.send(sse::text_end(&message_id)).await;

        let finish_reason = if outcome.error.is_some() { "error" } else { "complete" };
        let _ = tx.send(sse::finish(finish_reason, &message_id)).await;
        let _ = tx.send(sse::done()).await;
    });

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keepalive");

    let stream = ReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    let boxed: BoxedEventStream = Box::pin(stream);
    Sse::new(boxed).keep_alive(keep_alive)
}

/// Picks the narrative the client should read aloud, in the same fallback
/// order `Orchestrator::finalize` uses to persist the assistant turn:
/// dashboard conclusion, then direct response, then clarifying question,
/// then a user-legible error message on an error-only terminal state.
fn narrative_text(outcome: &RunOutcome) -> String {
    if let Some(spec) = &outcome.spec {
        if let Some(conclusion) = &spec.conclusion {
            return conclusion.clone();
        }
    }
    if let Some(direct) = &outcome.direct_response {
        return direct.clone();
    }
    if let Some(clarification) = &outcome.clarification {
        return clarification.question.clone();
    }
    if let Some(err) = &outcome.error {
        return format!("Error procesando la consulta: {err}");
    }
    "Error procesando la consulta".to_string()
}
