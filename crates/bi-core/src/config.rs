//! Runtime configuration loaded from the environment.
//!
//! Mirrors the donor's `SovereignConfig::from_env` shape: one struct, one
//! `from_env()` constructor, small private `env_*` parsers with a fallback
//! default per field so a missing or malformed variable never panics.

use serde::{Deserialize, Serialize};

/// Process-wide configuration loaded once at startup and handed to the
/// Orchestrator as a read-only dependency.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | `PORT` | 8080 | HTTP bind port. |
/// | `HOST` | 0.0.0.0 | HTTP bind address. |
/// | `DB_URL` | (unset) | Postgres connection string for the Data Executor. |
/// | `DB_TIMEOUT_SECONDS` | 30 | Per-query timeout budget. |
/// | `MEMORY_BACKEND` | memory | `postgres` \| `sqlite` \| `memory`. |
/// | `MEMORY_TTL_HOURS` | 720 | Conversation retention window. |
/// | `MEMORY_TIMEOUT_SECONDS` | 10 | Per-call timeout for the history store. |
/// | `USE_LLM_ROUTER` | false | Gate the Router's language-model fallback (step 5). |
/// | `USE_LLM_PLANNER` | false | Gate the Planner's ambiguous-reference fallback. |
/// | `PRESENTATION_USE_LLM` | false | Select the Composer's narrative mode. |
/// | `DEMO_MODE` | true | Synthesize payloads; no DB, no LLM. |
/// | `FRONTEND_URL` | (unset) | CORS allowlist origin. |
/// | `LLM_PROVIDER` | openrouter | Provider id (currently only the OpenRouter adapter is wired). |
/// | `LLM_MODEL` | (unset) | Model id for the provider above. |
/// | `LLM_API_KEY` | (unset) | API key for the provider above. |
/// | `LLM_BASE_URL` | (unset) | Override base URL (self-hosted / proxy providers). |
/// | `LLM_TIMEOUT_SECONDS` | 60 | Per-call LLM timeout budget. |
/// | `RUST_LOG` | info | `tracing-subscriber` env-filter directive. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub db_url: Option<String>,
    pub db_timeout_seconds: u64,

    pub memory_backend: MemoryBackend,
    pub memory_ttl_hours: u64,
    pub memory_timeout_seconds: u64,

    pub use_llm_router: bool,
    pub use_llm_planner: bool,
    pub presentation_use_llm: bool,
    pub demo_mode: bool,

    pub frontend_url: Option<String>,

    pub llm_provider: String,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_timeout_seconds: u64,

    pub log_directive: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    Postgres,
    Sqlite,
    Memory,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            db_url: None,
            db_timeout_seconds: 30,
            memory_backend: MemoryBackend::Memory,
            memory_ttl_hours: 720,
            memory_timeout_seconds: 10,
            use_llm_router: false,
            use_llm_planner: false,
            presentation_use_llm: false,
            demo_mode: true,
            frontend_url: None,
            llm_provider: "openrouter".to_string(),
            llm_model: None,
            llm_api_key: None,
            llm_base_url: None,
            llm_timeout_seconds: 60,
            log_directive: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from environment. Unset or invalid => defaults (see field docs).
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: env_string("HOST", &default.host),
            port: env_u16("PORT", default.port),
            db_url: env_opt_string("DB_URL"),
            db_timeout_seconds: env_u64("DB_TIMEOUT_SECONDS", default.db_timeout_seconds),
            memory_backend: env_memory_backend(default.memory_backend),
            memory_ttl_hours: env_u64("MEMORY_TTL_HOURS", default.memory_ttl_hours),
            memory_timeout_seconds: env_u64(
                "MEMORY_TIMEOUT_SECONDS",
                default.memory_timeout_seconds,
            ),
            use_llm_router: env_bool("USE_LLM_ROUTER", default.use_llm_router),
            use_llm_planner: env_bool("USE_LLM_PLANNER", default.use_llm_planner),
            presentation_use_llm: env_bool(
                "PRESENTATION_USE_LLM",
                default.presentation_use_llm,
            ),
            demo_mode: env_bool("DEMO_MODE", default.demo_mode),
            frontend_url: env_opt_string("FRONTEND_URL"),
            llm_provider: env_string("LLM_PROVIDER", &default.llm_provider),
            llm_model: env_opt_string("LLM_MODEL"),
            llm_api_key: env_opt_string("LLM_API_KEY"),
            llm_base_url: env_opt_string("LLM_BASE_URL"),
            llm_timeout_seconds: env_u64("LLM_TIMEOUT_SECONDS", default.llm_timeout_seconds),
            log_directive: env_string("RUST_LOG", &default.log_directive),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v.trim().eq_ignore_ascii_case("true") || (v.trim().is_empty() && default),
        Err(_) => default,
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u16(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_memory_backend(default: MemoryBackend) -> MemoryBackend {
    match std::env::var("MEMORY_BACKEND") {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "postgres" => MemoryBackend::Postgres,
            "sqlite" => MemoryBackend::Sqlite,
            "memory" => MemoryBackend::Memory,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_demo_safe() {
        let config = Config::default();
        assert!(config.demo_mode);
        assert!(!config.use_llm_router);
        assert_eq!(config.memory_backend, MemoryBackend::Memory);
    }
}
