//! Orchestrator graph (SPEC_FULL.md §4.6): Router -> DirectResponse /
//! Clarification / DataExecutor -> Reflection -> Composer -> End. Threads
//! `OrchestratorState` through each node, recording a `StepRecord` per
//! transition, enforcing a recursion limit and a retry budget of 3, and
//! short-circuiting through per-node TTL caches.
//!
//! Grounded in the donor's own graph-building module for the node-as-
//! function / explicit-transition shape; the node set and cache policy are
//! ported from `graphs/` (recovered via original_source) rather than
//! invented.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::allowlist::Allowlist;
use crate::cache::{CacheStats, TtlCache};
use crate::composer;
use crate::config::Config;
use crate::error::AppError;
use crate::executor::{self, Database};
use crate::llm::LlmClient;
use crate::memory::{render_context, SharedConversationStore};
use crate::model::{
    ConversationTurn, DashboardSpec, DataPayload, Domain, OrchestratorState, QueryPlan, Request,
    ResponseType, RoutingDecision, StepDetail, StepStatus, TurnRole,
};
use crate::planner;
use crate::router;

const RECURSION_LIMIT: u32 = 15;

/// Shared, read-only collaborators every request's run threads through.
/// Cloned cheaply (all fields are `Arc`-backed) per inbound request.
pub struct Orchestrator {
    pub config: Arc<Config>,
    pub llm: Arc<dyn LlmClient>,
    pub db: Arc<dyn Database>,
    pub conversations: SharedConversationStore,
    router_cache: TtlCache<RoutingDecision>,
    data_cache: TtlCache<DataPayload>,
    composer_cache: TtlCache<DashboardSpec>,
    direct_response_cache: TtlCache<String>,
}

/// Final outcome of one orchestrator run: everything the gateway's SSE
/// framing needs, plus the full step trajectory for `data-agent_step`.
pub struct RunOutcome {
    pub trace_id: uuid::Uuid,
    pub thread_id: String,
    pub response_type: ResponseType,
    pub direct_response: Option<String>,
    pub clarification: Option<crate::model::Clarification>,
    pub payload: Option<DataPayload>,
    pub spec: Option<DashboardSpec>,
    pub steps: Vec<crate::model::StepRecord>,
    pub error: Option<AppError>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        db: Arc<dyn Database>,
        conversations: SharedConversationStore,
    ) -> Self {
        Self {
            config: Arc::new(config),
            llm,
            db,
            conversations,
            router_cache: TtlCache::new("router", 200, Duration::from_secs(600)),
            data_cache: TtlCache::new("data_executor", 100, Duration::from_secs(300)),
            composer_cache: TtlCache::new("composer", 50, Duration::from_secs(180)),
            direct_response_cache: TtlCache::new("direct_response", 50, Duration::from_secs(3600)),
        }
    }

    pub fn cache_stats(&self) -> Vec<CacheStats> {
        vec![
            self.router_cache.stats(),
            self.data_cache.stats(),
            self.composer_cache.stats(),
            self.direct_response_cache.stats(),
        ]
    }

    pub fn invalidate_all_caches(&self) {
        self.router_cache.invalidate_all();
        self.data_cache.invalidate_all();
        self.composer_cache.invalidate_all();
        self.direct_response_cache.invalidate_all();
    }

    /// Drops one node's cache by name, or every cache when `node_name` is
    /// `None` — mirrors the donor's `invalidate_cache(node_name: Optional[str])`.
    /// An unknown name is a no-op rather than an error: the cache-admin
    /// surface is a best-effort operational knob, not a validated API.
    pub fn invalidate_cache(&self, node_name: Option<&str>) {
        match node_name {
            None => self.invalidate_all_caches(),
            Some("router") => self.router_cache.invalidate_all(),
            Some("data_executor") => self.data_cache.invalidate_all(),
            Some("composer") => self.composer_cache.invalidate_all(),
            Some("direct_response") => self.direct_response_cache.invalidate_all(),
            Some(_) => {}
        }
    }

    /// Full run of the graph for one request. `thread_id` defaults to a fresh
    /// uuid when `request.conversation_id` is absent.
    pub async fn run(&self, request: Request) -> RunOutcome {
        self.run_with_progress(request, |_| {}).await
    }

    /// Same as `run`, but invokes `on_step` once per transition as soon as it
    /// lands on `state.steps`, rather than only after the whole graph
    /// finishes. This is what `bi-gateway` drives its `data-agent_step` SSE
    /// events from (SPEC_FULL.md §4.7, §9 "coroutine-driven streaming" shape
    /// (a): a single task writing onto a channel the HTTP writer drains).
    pub async fn run_with_progress(
        &self,
        request: Request,
        mut on_step: impl FnMut(&crate::model::StepRecord),
    ) -> RunOutcome {
        let thread_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut state = OrchestratorState::new(request, thread_id);
        let mut hops: u32 = 0;
        let mut node = "Router";
        let mut emitted = 0usize;

        loop {
            hops += 1;
            if hops > RECURSION_LIMIT {
                state.push_step(
                    "End",
                    StepStatus::Error,
                    StepDetail::Message { text: "recursion limit exceeded".to_string() },
                );
                state.last_error = Some(AppError::Internal("recursion limit exceeded".to_string()));
                for step in &state.steps[emitted..] {
                    on_step(step);
                }
                break;
            }

            node = match node {
                "Router" => self.run_router(&mut state).await,
                "Clarification" => self.run_clarification(&mut state).await,
                "DataExecutor" => self.run_data_executor(&mut state).await,
                "Reflection" => self.run_reflection(&mut state).await,
                "Composer" => self.run_composer(&mut state).await,
                "DirectResponse" => self.run_direct_response(&mut state).await,
                _ => "End",
            };
            for step in &state.steps[emitted..] {
                on_step(step);
            }
            emitted = state.steps.len();
            if node == "End" {
                break;
            }
        }

        self.finalize(&mut state).await;

        RunOutcome {
            trace_id: state.trace_id,
            thread_id: state.thread_id.clone(),
            response_type: state
                .routing_decision
                .as_ref()
                .map(|d| d.response_type)
                .unwrap_or(ResponseType::Dashboard),
            direct_response: state
                .routing_decision
                .as_ref()
                .and_then(|d| d.direct_response.clone()),
            clarification: state
                .routing_decision
                .as_ref()
                .and_then(|d| d.clarification.clone()),
            payload: state.payload,
            spec: state.spec,
            steps: state.steps,
            error: state.last_error,
        }
    }

    async fn run_router(&self, state: &mut OrchestratorState) -> &'static str {
        let turn = ConversationTurn {
            thread_id: state.thread_id.clone(),
            user_id: state.request.user_id.clone(),
            role: TurnRole::User,
            content: state.request.question.clone(),
            metadata: Default::default(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.conversations.append(turn).await {
            tracing::warn!(error = %err, "failed to persist user turn");
        }

        let key = TtlCache::<RoutingDecision>::key_for(&[state.request.question.as_str()]);
        if let Some(cached) = self.router_cache.get(key) {
            state.push_step(
                "Router",
                StepStatus::Skipped,
                StepDetail::CacheHit { cache: "router".to_string() },
            );
            return self.route_after_decision(state, cached);
        }

        let decision = if self.config.use_llm_router {
            router::route(&state.request.question, self.llm.as_ref()).await
        } else {
            router::route_heuristic(&state.request.question)
                .unwrap_or_else(|| RoutingDecision::dashboard(Domain::Sales, 0.5, "no heuristic match, demo default"))
        };
        self.router_cache.insert(key, decision.clone());
        state.push_step("Router", StepStatus::Success, StepDetail::None);
        self.route_after_decision(state, decision)
    }

    fn route_after_decision(&self, state: &mut OrchestratorState, decision: RoutingDecision) -> &'static str {
        let next = match decision.response_type {
            ResponseType::Conversational => "DirectResponse",
            ResponseType::Clarification => "Clarification",
            ResponseType::DataOnly | ResponseType::Dashboard => "DataExecutor",
        };
        state.routing_decision = Some(decision);
        next
    }

    async fn run_direct_response(&self, state: &mut OrchestratorState) -> &'static str {
        state.push_step("DirectResponse", StepStatus::Success, StepDetail::None);
        "End"
    }

    async fn run_clarification(&self, state: &mut OrchestratorState) -> &'static str {
        let turns = self
            .conversations
            .recent(&state.thread_id, 10)
            .await
            .unwrap_or_default();
        let context = render_context(&turns);

        if !context.is_empty() {
            match self
                .llm
                .infer_domain_or_clarify(&state.request.question, &context)
                .await
            {
                Ok(Some(domain)) => {
                    state.push_step(
                        "Clarification",
                        StepStatus::Success,
                        StepDetail::Message { text: format!("inferred domain: {}", domain.as_str()) },
                    );
                    state.routing_decision = Some(RoutingDecision::dashboard(
                        domain,
                        0.7,
                        "inferred from conversation context",
                    ));
                    return "DataExecutor";
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "clarification llm call failed, asking user");
                }
            }
        }

        state.push_step("Clarification", StepStatus::Success, StepDetail::None);
        "End"
    }

    async fn run_data_executor(&self, state: &mut OrchestratorState) -> &'static str {
        let decision = match &state.routing_decision {
            Some(d) => d.clone(),
            None => {
                state.last_error = Some(AppError::Internal("missing routing decision".to_string()));
                return "End";
            }
        };

        let date_range = planner::extract_date_range(&state.request.question);
        let date_range_key = format!("{date_range:?}");
        let key = TtlCache::<DataPayload>::key_for(&[
            state.request.question.as_str(),
            date_range_key.as_str(),
        ]);
        if let Some(cached) = self.data_cache.get(key) {
            state.push_step(
                "DataExecutor",
                StepStatus::Skipped,
                StepDetail::CacheHit { cache: "data_executor".to_string() },
            );
            if decision.needs_dashboard {
                state.payload = Some(cached);
                return "Composer";
            }
            state.spec = Some(minimal_spec_from_payload(&cached));
            state.payload = Some(cached);
            return "End";
        }

        let turns = self
            .conversations
            .recent(&state.thread_id, 10)
            .await
            .unwrap_or_default();
        let context = render_context(&turns);
        let comparison_dates = planner::extract_comparison_dates(&state.request.question);

        let plan = planner::plan_queries(
            &state.request.question,
            Some(&context),
            self.config.use_llm_planner,
            self.llm.as_ref(),
        )
        .await;
        state.plan = Some(plan.clone());

        let result = if comparison_dates.is_comparison {
            match comparison_dates.previous_period {
                Some(previous) => {
                    executor::execute_comparison(
                        &plan,
                        self.db.as_ref(),
                        (
                            comparison_dates.current_period.label,
                            comparison_dates.current_period.date_from,
                            comparison_dates.current_period.date_to,
                        ),
                        (previous.label, previous.date_from, previous.date_to),
                    )
                    .await
                }
                None => {
                    executor::execute_plan(&plan, self.db.as_ref(), date_range).await
                }
            }
        } else {
            executor::execute_plan(&plan, self.db.as_ref(), date_range).await
        };

        match result {
            Ok(payload) => {
                self.data_cache.insert(key, payload.clone());
                state.push_step("DataExecutor", StepStatus::Success, StepDetail::None);
                if decision.needs_dashboard {
                    state.payload = Some(payload);
                    "Composer"
                } else {
                    state.spec = Some(minimal_spec_from_payload(&payload));
                    state.payload = Some(payload);
                    "End"
                }
            }
            Err(err) => {
                state.last_error = Some(err.clone());
                state.push_step(
                    "DataExecutor",
                    StepStatus::Error,
                    StepDetail::Message { text: err.to_string() },
                );
                if state.retries_remaining() {
                    "Reflection"
                } else {
                    "End"
                }
            }
        }
    }

    async fn run_reflection(&self, state: &mut OrchestratorState) -> &'static str {
        state.retry_count += 1;
        state.push_step(
            "Reflection",
            StepStatus::Progress,
            StepDetail::Retry { attempt: state.retry_count },
        );

        // Narrow the plan: drop the last id and retry with what remains, the
        // simplest reflection a keyword-ported planner can offer without a
        // model call. An empty plan falls back to the sales default pair.
        if let Some(plan) = state.plan.as_mut() {
            if plan.query_ids.len() > 1 {
                plan.query_ids.pop();
            } else {
                *plan = QueryPlan::new(vec![
                    "kpi_sales_summary".to_string(),
                    "ts_sales_by_day".to_string(),
                ]);
            }
            plan.query_ids.retain(|id| Allowlist::validate(id));
        }
        state.last_error = None;
        "DataExecutor"
    }

    async fn run_composer(&self, state: &mut OrchestratorState) -> &'static str {
        let payload = match &state.payload {
            Some(p) => p.clone(),
            None => {
                state.last_error = Some(AppError::Internal("composer invoked with no payload".to_string()));
                return "End";
            }
        };

        let key = TtlCache::<DashboardSpec>::key_for(&[state.request.question.as_str()]);
        if let Some(cached) = self.composer_cache.get(key) {
            state.push_step(
                "Composer",
                StepStatus::Skipped,
                StepDetail::CacheHit { cache: "composer".to_string() },
            );
            state.spec = Some(cached);
            return "End";
        }

        let turns = self
            .conversations
            .recent(&state.thread_id, 10)
            .await
            .unwrap_or_default();
        let context = render_context(&turns);

        let spec = composer::compose(
            &state.request.question,
            &payload,
            &context,
            self.llm.as_ref(),
            self.config.presentation_use_llm,
        )
        .await;

        self.composer_cache.insert(key, spec.clone());
        state.push_step("Composer", StepStatus::Success, StepDetail::None);
        state.spec = Some(spec);
        "End"
    }

    async fn finalize(&self, state: &mut OrchestratorState) {
        let assistant_text = state
            .spec
            .as_ref()
            .and_then(|s| s.conclusion.clone())
            .or_else(|| state.routing_decision.as_ref().and_then(|d| d.direct_response.clone()))
            .or_else(|| {
                state
                    .routing_decision
                    .as_ref()
                    .and_then(|d| d.clarification.as_ref())
                    .map(|c| c.question.clone())
            });

        if let Some(content) = assistant_text {
            let turn = ConversationTurn {
                thread_id: state.thread_id.clone(),
                user_id: state.request.user_id.clone(),
                role: TurnRole::Assistant,
                content,
                metadata: Default::default(),
                created_at: Utc::now(),
            };
            if let Err(err) = self.conversations.append(turn).await {
                tracing::warn!(error = %err, "failed to persist assistant turn");
            }
        }
    }
}

/// Builds a minimal spec for `needs_dashboard = false` runs (data-only
/// responses skip the Composer per SPEC_FULL.md §4.6).
pub fn minimal_spec_from_payload(payload: &DataPayload) -> DashboardSpec {
    let conclusion = payload
        .kpis
        .get("total_sales")
        .map(|v| format!("Ventas totales: ${v:.0}"))
        .unwrap_or_else(|| "Datos procesados".to_string());
    DashboardSpec::minimal("Resultado", conclusion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DemoDatabase;
    use crate::llm::DemoLlmClient;
    use crate::memory::InMemoryConversationStore;

    fn test_orchestrator() -> Orchestrator {
        Orchestrator::new(
            Config::default(),
            Arc::new(DemoLlmClient),
            Arc::new(DemoDatabase),
            Arc::new(InMemoryConversationStore::new()),
        )
    }

    #[tokio::test]
    async fn conversational_question_short_circuits_to_direct_response() {
        let orchestrator = test_orchestrator();
        let outcome = orchestrator.run(Request::new("hola")).await;
        assert_eq!(outcome.response_type, ResponseType::Conversational);
        assert!(outcome.direct_response.is_some());
        assert!(outcome.spec.is_none());
    }

    #[tokio::test]
    async fn dashboard_question_runs_full_pipeline_to_a_spec() {
        let orchestrator = test_orchestrator();
        let outcome = orchestrator
            .run(Request::new("mostrame el dashboard de ventas de este mes"))
            .await;
        assert_eq!(outcome.response_type, ResponseType::Dashboard);
        assert!(outcome.payload.is_some());
        assert!(outcome.spec.is_some());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn ambiguous_question_asks_for_clarification() {
        let orchestrator = test_orchestrator();
        let outcome = orchestrator.run(Request::new("mostrame")).await;
        assert_eq!(outcome.response_type, ResponseType::Clarification);
        assert!(outcome.clarification.is_some());
    }

    #[tokio::test]
    async fn second_call_hits_the_router_cache() {
        let orchestrator = test_orchestrator();
        orchestrator.run(Request::new("hola")).await;
        orchestrator.run(Request::new("hola")).await;
        let stats = orchestrator.cache_stats();
        let router_stats = stats.iter().find(|s| s.name == "router").unwrap();
        assert!(router_stats.hits >= 1);
    }

    #[tokio::test]
    async fn conversation_turns_are_persisted_after_a_run() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::new(
            Config::default(),
            Arc::new(DemoLlmClient),
            Arc::new(DemoDatabase),
            store.clone(),
        );
        let request = Request::new("hola");
        let outcome = orchestrator.run(request).await;
        assert!(outcome.direct_response.is_some());
    }
}
