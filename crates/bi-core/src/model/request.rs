use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One inbound natural-language BI question. Immutable for the lifetime of
/// the request it starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
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

impl Request {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            date_from: None,
            date_to: None,
            filters: HashMap::new(),
            conversation_id: None,
            user_id: None,
        }
    }
}
