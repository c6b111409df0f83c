use serde::{Deserialize, Serialize};

use super::{DashboardSpec, DataPayload, QueryPlan, Request, RoutingDecision};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Progress,
    Success,
    Error,
    Skipped,
}

/// Detail attached to a step record. `CacheHit` makes a cache-short-circuit
/// visible in the trajectory instead of a silent bypass (SPEC_FULL.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepDetail {
    CacheHit { cache: String },
    Retry { attempt: u32 },
    Message { text: String },
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub node: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status: StepStatus,
    pub detail: StepDetail,
}

impl StepRecord {
    pub fn new(node: &'static str, status: StepStatus, detail: StepDetail) -> Self {
        Self {
            node,
            timestamp: chrono::Utc::now(),
            status,
            detail,
        }
    }
}

/// Exclusively owned by the Orchestrator for the lifetime of one request;
/// never shared across requests or persisted between turns.
#[derive(Debug, Clone)]
pub struct OrchestratorState {
    pub request: Request,
    pub trace_id: uuid::Uuid,
    pub thread_id: String,
    pub routing_decision: Option<RoutingDecision>,
    pub plan: Option<QueryPlan>,
    pub payload: Option<DataPayload>,
    pub spec: Option<DashboardSpec>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<AppError>,
    pub steps: Vec<StepRecord>,
}

impl OrchestratorState {
    pub fn new(request: Request, thread_id: String) -> Self {
        Self {
            request,
            trace_id: uuid::Uuid::new_v4(),
            thread_id,
            routing_decision: None,
            plan: None,
            payload: None,
            spec: None,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            steps: Vec::new(),
        }
    }

    pub fn push_step(&mut self, node: &'static str, status: StepStatus, detail: StepDetail) {
        self.steps.push(StepRecord::new(node, status, detail));
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
