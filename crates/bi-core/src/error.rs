//! Crate-wide error taxonomy.
//!
//! Every node boundary in the orchestrator returns a `Result<_, AppError>`
//! rather than raising; `Reflection` branches on the variant, never on a
//! caught exception. See SPEC_FULL.md §7.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("unknown allowlist query id: {0}")]
    InvalidQuery(String),

    #[error("missing required parameter `{param}` for query `{query_id}`")]
    MissingParam { query_id: String, param: String },

    #[error("database error executing `{query_id}`: {message}")]
    Database { query_id: String, message: String },

    #[error("llm call failed: {0}")]
    Llm(String),

    #[error("llm rate limited, retry after {retry_after_secs:?}s: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the underlying message looks like a rate-limit/quota error,
    /// the same heuristic the reference implementation's retry decorators use:
    /// an HTTP 429, or the strings "RESOURCE_EXHAUSTED" / "quota" (any case).
    pub fn looks_rate_limited(message: &str) -> bool {
        let lower = message.to_lowercase();
        lower.contains("429") || lower.contains("resource_exhausted") || lower.contains("quota")
    }

    /// Parse an explicit "retry in N" (seconds) hint out of a provider error
    /// message, when present, following `presentation_agent.py`'s enhanced
    /// backoff decorator.
    pub fn parse_retry_after(message: &str) -> Option<u64> {
        let lower = message.to_lowercase();
        let idx = lower.find("retry in")?;
        let rest = &lower[idx + "retry in".len()..];
        let digits: String = rest
            .chars()
            .skip_while(|c| c.is_whitespace())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RateLimited { .. })
            || matches!(self, AppError::Llm(msg) if Self::looks_rate_limited(msg))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rate_limit_shaped_messages() {
        assert!(AppError::looks_rate_limited("HTTP 429 Too Many Requests"));
        assert!(AppError::looks_rate_limited("RESOURCE_EXHAUSTED: quota"));
        assert!(!AppError::looks_rate_limited("connection refused"));
    }

    #[test]
    fn parses_retry_after_hint() {
        assert_eq!(
            AppError::parse_retry_after("rate limited, retry in 12 seconds"),
            Some(12)
        );
        assert_eq!(AppError::parse_retry_after("no hint here"), None);
    }
}
