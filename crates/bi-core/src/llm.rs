//! Language-model collaborator (SPEC_FULL.md §6.2). Out of scope: the
//! provider's own wire format and auth are an external concern; what this
//! crate owns is the narrow structured-output contract each of the four call
//! sites needs (Router fallback, Planner ambiguous-reference fallback,
//! Clarification "do we truly need to ask?", Composer language-mode
//! narrative) and the retry/backoff policy around it (SPEC_FULL.md §5).
//!
//! Grounded in the donor's `model_router.rs`: an OpenAI-compatible chat
//! completion over `reqwest`, env-selected provider/model/key, Mock vs Live
//! mode so the crate runs end-to-end with zero external services.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::model::Domain;

/// Structured result of the Router's fallback classifier (§4.3 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRoutingResult {
    pub response_type: String,
    pub domain: Option<String>,
    pub reasoning: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Structured result of the Composer's language-mode narrative (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmNarrativeResult {
    pub conclusion: String,
    pub summary: String,
    pub insights: Vec<String>,
    pub recommendation: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Router's step 5 fallback: classify free text into the routing
    /// taxonomy when no deterministic pattern matched.
    async fn classify_intent(&self, question: &str) -> AppResult<LlmRoutingResult>;

    /// Planner's ambiguous-reference escape hatch: given chat context and the
    /// allowlist description table, return a subset of ids.
    async fn plan_queries(
        &self,
        question: &str,
        context: &str,
        available: &HashMap<String, String>,
    ) -> AppResult<Vec<String>>;

    /// Clarification node's "do we truly need to ask?" evaluator: `Some`
    /// domain means intent could be inferred and no clarification is needed.
    async fn infer_domain_or_clarify(
        &self,
        question: &str,
        context: &str,
    ) -> AppResult<Option<Domain>>;

    /// Composer's language-mode narrative.
    async fn generate_narrative(
        &self,
        question: &str,
        context: &str,
        payload_summary: &str,
    ) -> AppResult<LlmNarrativeResult>;
}

/// Deterministic stand-in used in `DEMO_MODE` and whenever the gating flags
/// (`USE_LLM_ROUTER`, `USE_LLM_PLANNER`, `PRESENTATION_USE_LLM`) are off. All
/// four methods return the same conservative defaults the reference
/// implementation falls back to on adapter failure, so call sites never need
/// a second fallback branch for "no LLM configured" versus "LLM call failed".
pub struct DemoLlmClient;

#[async_trait]
impl LlmClient for DemoLlmClient {
    async fn classify_intent(&self, _question: &str) -> AppResult<LlmRoutingResult> {
        Ok(LlmRoutingResult {
            response_type: "dashboard".to_string(),
            domain: Some("sales".to_string()),
            reasoning: "demo mode: default dashboard/sales classification".to_string(),
            confidence: Some(0.5),
        })
    }

    async fn plan_queries(
        &self,
        _question: &str,
        _context: &str,
        _available: &HashMap<String, String>,
    ) -> AppResult<Vec<String>> {
        Ok(vec![
            "kpi_sales_summary".to_string(),
            "ts_sales_by_day".to_string(),
            "top_products_by_revenue".to_string(),
        ])
    }

    async fn infer_domain_or_clarify(
        &self,
        _question: &str,
        _context: &str,
    ) -> AppResult<Option<Domain>> {
        Ok(None)
    }

    async fn generate_narrative(
        &self,
        _question: &str,
        _context: &str,
        _payload_summary: &str,
    ) -> AppResult<LlmNarrativeResult> {
        Err(AppError::Llm("demo mode: no narrative model configured".to_string()))
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// Live OpenAI-compatible adapter (OpenRouter by default). Every call asks
/// for a JSON object and parses it against the named schema; a parse failure
/// surfaces as `AppError::Llm` so the caller's own fallback (heuristic
/// narrative, default plan, keyword router) takes over.
pub struct OpenRouterLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenRouterLlmClient {
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.llm_api_key.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url: config
                .llm_base_url
                .clone()
                .unwrap_or_else(|| "https://openrouter.ai/api/v1/chat/completions".to_string()),
            api_key,
            model: config
                .llm_model
                .clone()
                .unwrap_or_else(|| "openai/gpt-4o-mini".to_string()),
            timeout: Duration::from_secs(config.llm_timeout_seconds),
        })
    }

    async fn complete_json(&self, system: &str, user: &str) -> AppResult<Value> {
        retry_with_backoff(3, || async {
            let request = ChatRequest {
                model: self.model.clone(),
                messages: vec![
                    ChatMessage {
                        role: "system".to_string(),
                        content: system.to_string(),
                    },
                    ChatMessage {
                        role: "user".to_string(),
                        content: user.to_string(),
                    },
                ],
                temperature: 0.2,
                response_format: Some(serde_json::json!({ "type": "json_object" })),
            };
            let response = self
                .client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| AppError::Llm(e.to_string()))?;

            if response.status().as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(AppError::RateLimited {
                    message: "rate limited by LLM provider".to_string(),
                    retry_after_secs: retry_after,
                });
            }
            if !response.status().is_success() {
                return Err(AppError::Llm(format!(
                    "llm provider returned {}",
                    response.status()
                )));
            }
            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| AppError::Llm(e.to_string()))?;
            let content = parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| AppError::Llm("empty choices from llm provider".to_string()))?;
            serde_json::from_str(&content).map_err(|e| AppError::Llm(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl LlmClient for OpenRouterLlmClient {
    async fn classify_intent(&self, question: &str) -> AppResult<LlmRoutingResult> {
        let system = "Clasifica la intencion del usuario en JSON: \
            {response_type: conversational|data_only|dashboard|clarification, domain, reasoning, confidence}.";
        let value = self.complete_json(system, question).await?;
        serde_json::from_value(value).map_err(|e| AppError::Llm(e.to_string()))
    }

    async fn plan_queries(
        &self,
        question: &str,
        context: &str,
        available: &HashMap<String, String>,
    ) -> AppResult<Vec<String>> {
        let catalog = available
            .iter()
            .map(|(id, desc)| format!("- {id}: {desc}"))
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!(
            "Dado el contexto de la conversacion y esta lista de consultas permitidas, \
             responde JSON {{\"query_ids\": [...]}} con como maximo 3 ids de esta lista:\n{catalog}"
        );
        let user = format!("Contexto:\n{context}\n\nPregunta: {question}");
        let value = self.complete_json(&system, &user).await?;
        let ids: Vec<String> = value
            .get("query_ids")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn infer_domain_or_clarify(
        &self,
        question: &str,
        context: &str,
    ) -> AppResult<Option<Domain>> {
        let system = "Responde JSON {\"domain\": \"sales|inventory|conversations|escalations|presale\"|null} \
            indicando si la intencion se puede inferir del contexto sin preguntar de nuevo.";
        let user = format!("Contexto:\n{context}\n\nPregunta: {question}");
        let value = self.complete_json(system, &user).await?;
        Ok(value
            .get("domain")
            .and_then(|v| v.as_str())
            .and_then(domain_from_str))
    }

    async fn generate_narrative(
        &self,
        question: &str,
        context: &str,
        payload_summary: &str,
    ) -> AppResult<LlmNarrativeResult> {
        let system = "Eres un analista de BI. Responde JSON \
            {conclusion, summary, insights: [string], recommendation} en espanol, con cifras concretas.";
        let user = format!(
            "Contexto:\n{context}\n\nPregunta: {question}\n\nDatos:\n{payload_summary}"
        );
        let value = self.complete_json(system, &user).await?;
        serde_json::from_value(value).map_err(|e| AppError::Llm(e.to_string()))
    }
}

fn domain_from_str(s: &str) -> Option<Domain> {
    match s {
        "sales" => Some(Domain::Sales),
        "inventory" => Some(Domain::Inventory),
        "conversations" => Some(Domain::Conversations),
        "escalations" => Some(Domain::Escalations),
        "presale" => Some(Domain::Presale),
        _ => None,
    }
}

/// Capped exponential backoff (base 2s, cap 60s), retrying only rate-limit
/// shaped errors, honoring an explicit `retry-after` hint when present
/// (SPEC_FULL.md §5).
pub async fn retry_with_backoff<T, F, Fut>(max_attempts: u32, mut call: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let computed = Duration::from_secs(2u64.saturating_pow(attempt + 1).min(60));
                let delay = match &err {
                    AppError::RateLimited {
                        retry_after_secs: Some(hint),
                        ..
                    } => Duration::from_secs(*hint),
                    _ => computed,
                };
                tracing::warn!(attempt, ?delay, error = %err, "retrying llm call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_rate_limited_errors_up_to_the_budget() {
        let attempts = AtomicU32::new(0);
        let result: AppResult<u32> = retry_with_backoff(3, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(AppError::RateLimited {
                    message: "429".to_string(),
                    retry_after_secs: Some(0),
                })
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_rate_limit_errors() {
        let attempts = AtomicU32::new(0);
        let result: AppResult<u32> = retry_with_backoff(3, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Internal("boom".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn demo_client_returns_safe_defaults() {
        let client = DemoLlmClient;
        let routing = client.classify_intent("algo").await.unwrap();
        assert_eq!(routing.response_type, "dashboard");
        let plan = client
            .plan_queries("algo", "", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(plan.len(), 3);
    }
}
