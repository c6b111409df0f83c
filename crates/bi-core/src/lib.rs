//! `bi-core`: the BI gateway's request-orchestration pipeline (SPEC_FULL.md
//! §1-§5). This crate owns the SQL allowlist, the data executor, the intent
//! router, the query planner, the presentation composer, and the
//! orchestrator graph that threads them together. It knows nothing about
//! HTTP; `bi-gateway` hosts it behind the streaming/non-streaming surface
//! from SPEC_FULL.md §6.
//!
//! External collaborators (a real Postgres driver, a real LLM provider, a
//! persistent conversation store) are modeled here as traits — `Database`,
//! `LlmClient`, `ConversationStore` — with a demo-mode implementation of
//! each so the whole pipeline runs end-to-end with zero outside services
//! when `DEMO_MODE=true` (the default).

pub mod allowlist;
pub mod cache;
pub mod composer;
pub mod config;
pub mod error;
pub mod executor;
pub mod llm;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod planner;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod router;

pub use allowlist::{Allowlist, OutputType, QueryTemplate};
pub use config::{Config, MemoryBackend};
pub use error::{AppError, AppResult};
pub use executor::{Database, DemoDatabase};
pub use llm::{DemoLlmClient, LlmClient, OpenRouterLlmClient};
pub use memory::{ConversationStore, InMemoryConversationStore, SharedConversationStore};
pub use orchestrator::{minimal_spec_from_payload, Orchestrator, RunOutcome};

#[cfg(feature = "postgres")]
pub use postgres::PostgresDatabase;
