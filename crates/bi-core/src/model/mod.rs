//! Wire and in-process data model shared by the router, planner, executor,
//! composer, and gateway. Every shape here is serde-derived so it can cross
//! the SSE boundary unchanged.

mod dashboard;
mod payload;
mod request;
mod routing;
mod state;

pub use dashboard::{
    ChartConfig, ChartKind, ComparisonChartConfig, DashboardSlots, DashboardSpec, KpiCardConfig,
    KpiFormat, NarrativeBlock, NarrativeKind, SlotConfig, TableConfig, Trend,
};
pub use payload::{
    ComparisonData, ComparisonPeriod, DataPayload, DatasetMeta, TimeSeriesData, TimeSeriesPoint,
    TopItem, TopItemsData,
};
pub use request::Request;
pub use routing::{Clarification, Domain, ResponseType, RoutingDecision};
pub use state::{OrchestratorState, StepDetail, StepRecord, StepStatus};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Selection of up to 3 allowlist ids plus parameter overrides, chosen by the
/// Query Planner and consumed by the Data Executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryPlan {
    pub query_ids: Vec<String>,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

impl QueryPlan {
    pub const MAX_IDS: usize = 3;

    pub fn new(query_ids: Vec<String>) -> Self {
        let mut query_ids = query_ids;
        query_ids.truncate(Self::MAX_IDS);
        Self {
            query_ids,
            params: HashMap::new(),
        }
    }

    pub fn with_params(mut self, params: HashMap<String, serde_json::Value>) -> Self {
        self.params = params;
        self
    }
}

/// A single turn of a conversation thread. Append-only; read back as the
/// most-recent N turns when composing chat context for the LLM paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub thread_id: String,
    pub user_id: Option<String>,
    pub role: TurnRole,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}
