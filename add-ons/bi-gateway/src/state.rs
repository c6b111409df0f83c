//! Shared, clone-cheap application state handed to every handler.
//!
//! Built once at startup from `Config::from_env` and wired with either the
//! demo collaborators or the real Postgres/OpenRouter ones, per
//! SPEC_FULL.md §9 ("global singletons... replace with explicit dependency
//! containers passed into the orchestrator at startup").

use std::sync::Arc;

use bi_core::{Config, Orchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<Config>,
}
