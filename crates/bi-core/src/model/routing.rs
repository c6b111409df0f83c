use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Conversational,
    DataOnly,
    Dashboard,
    Clarification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Sales,
    Inventory,
    Conversations,
    Escalations,
    Presale,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Sales => "sales",
            Domain::Inventory => "inventory",
            Domain::Conversations => "conversations",
            Domain::Escalations => "escalations",
            Domain::Presale => "presale",
        }
    }
}

/// A clarifying question the Router asks back when the request is
/// ambiguous, with a small closed set of suggested options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    pub options: Vec<String>,
    pub understood_context: String,
}

/// Output of the Intent Router: what kind of response the request needs,
/// and — when data is needed — which domain it most likely concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub response_type: ResponseType,
    pub needs_sql: bool,
    pub needs_dashboard: bool,
    pub needs_narrative: bool,
    pub domain: Option<Domain>,
    pub direct_response: Option<String>,
    pub clarification: Option<Clarification>,
    pub confidence: f32,
    pub reasoning: String,
}

impl RoutingDecision {
    pub fn conversational(direct_response: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Conversational,
            needs_sql: false,
            needs_dashboard: false,
            needs_narrative: false,
            domain: None,
            direct_response: Some(direct_response.into()),
            clarification: None,
            confidence: 0.95,
            reasoning: reasoning.into(),
        }
    }

    pub fn clarification(clarification: Clarification, reasoning: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Clarification,
            needs_sql: false,
            needs_dashboard: false,
            needs_narrative: false,
            domain: None,
            direct_response: None,
            clarification: Some(clarification),
            confidence: 0.7,
            reasoning: reasoning.into(),
        }
    }

    pub fn dashboard(domain: Domain, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Dashboard,
            needs_sql: true,
            needs_dashboard: true,
            needs_narrative: true,
            domain: Some(domain),
            direct_response: None,
            clarification: None,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    pub fn data_only(domain: Domain, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::DataOnly,
            needs_sql: true,
            needs_dashboard: false,
            needs_narrative: false,
            domain: Some(domain),
            direct_response: None,
            clarification: None,
            confidence,
            reasoning: reasoning.into(),
        }
    }
}
