//! Conversation-history store (SPEC_FULL.md §6.2, §3 "ConversationTurn").
//! The only shared mutable resource the Orchestrator touches: append is
//! idempotent per `(thread_id, role, created_at)`, and reads return the most
//! recent N turns for a thread, oldest first, for building chat context.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AppResult;
use crate::model::{ConversationTurn, TurnRole};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, turn: ConversationTurn) -> AppResult<()>;
    async fn recent(&self, thread_id: &str, limit: usize) -> AppResult<Vec<ConversationTurn>>;
}

/// `MEMORY_BACKEND=memory` implementation: process-local, lost on restart.
/// The real Postgres/SQLite backends are external collaborators out of scope
/// for this crate (SPEC_FULL.md §1); this is also what `DEMO_MODE` uses.
#[derive(Default)]
pub struct InMemoryConversationStore {
    threads: DashMap<String, Vec<ConversationTurn>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn dedupe_key(turn: &ConversationTurn) -> (String, String, i64) {
        let role = match turn.role {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        };
        (
            turn.thread_id.clone(),
            role.to_string(),
            turn.created_at.timestamp_nanos_opt().unwrap_or_default(),
        )
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, turn: ConversationTurn) -> AppResult<()> {
        let key = Self::dedupe_key(&turn);
        let mut entry = self.threads.entry(turn.thread_id.clone()).or_default();
        let already_present = entry
            .iter()
            .any(|existing| Self::dedupe_key(existing) == key);
        if !already_present {
            entry.push(turn);
        }
        Ok(())
    }

    async fn recent(&self, thread_id: &str, limit: usize) -> AppResult<Vec<ConversationTurn>> {
        let turns = match self.threads.get(thread_id) {
            Some(turns) => turns.clone(),
            None => return Ok(Vec::new()),
        };
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }
}

pub type SharedConversationStore = Arc<dyn ConversationStore>;

/// Builds a short chat-context string from recent turns, in the idiom the
/// LLM-assisted Planner/Clarification/Composer paths consume as a prefix.
pub fn render_context(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                TurnRole::User => "Usuario",
                TurnRole::Assistant => "Asistente",
            };
            format!("{role}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Helper retained for call sites that only need field-level context without
/// constructing a full `ConversationTurn` (e.g. a one-off system probe).
#[allow(dead_code)]
fn empty_metadata() -> HashMap<String, serde_json::Value> {
    HashMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(thread: &str, role: TurnRole, content: &str) -> ConversationTurn {
        ConversationTurn {
            thread_id: thread.to_string(),
            user_id: None,
            role,
            content: content.to_string(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_then_read_recent() {
        let store = InMemoryConversationStore::new();
        store
            .append(turn("t1", TurnRole::User, "hola"))
            .await
            .unwrap();
        store
            .append(turn("t1", TurnRole::Assistant, "hola! en que te ayudo?"))
            .await
            .unwrap();
        let recent = store.recent("t1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "hola");
    }

    #[tokio::test]
    async fn append_is_idempotent_per_thread_role_timestamp() {
        let store = InMemoryConversationStore::new();
        let t = turn("t1", TurnRole::User, "hola");
        store.append(t.clone()).await.unwrap();
        store.append(t.clone()).await.unwrap();
        let recent = store.recent("t1", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn recent_caps_at_limit_keeping_the_tail() {
        let store = InMemoryConversationStore::new();
        for i in 0..5 {
            store
                .append(turn("t1", TurnRole::User, &format!("msg {i}")))
                .await
                .unwrap();
        }
        let recent = store.recent("t1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].content, "msg 4");
    }
}
