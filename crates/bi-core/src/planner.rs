//! Query Planner (SPEC_FULL.md §4.4). Turns a question (plus optional chat
//! context) into a `QueryPlan` of at most 3 allowlist ids, and parses natural
//! Spanish date expressions into `[date_from, date_to)` windows, including
//! dual-period comparisons.
//!
//! Grounded in `date_parser.py` (`extract_date_range`, `extract_comparison_dates`)
//! and `data_agent.py` (`_decide_queries_heuristic`, `decide_queries`). Branch
//! ordering in `keyword_route` mirrors the reference implementation's
//! `elif` chain exactly; see DESIGN.md for the two Open Question
//! resolutions this port applies (3-id cap, `ts_top_product_sales` mapped to
//! `ts_sales_by_day`).

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::allowlist::{month_bounds, Allowlist};
use crate::llm::LlmClient;
use crate::model::QueryPlan;

/// A single labelled date window, half-open `[date_from, date_to)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePeriod {
    pub label: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

/// Result of date extraction: either one period, or a comparison between a
/// current and a previous period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonDateRange {
    pub is_comparison: bool,
    pub current_period: DatePeriod,
    pub previous_period: Option<DatePeriod>,
}

const SPANISH_MONTHS: &[(&str, u32)] = &[
    ("enero", 1),
    ("ene", 1),
    ("febrero", 2),
    ("feb", 2),
    ("marzo", 3),
    ("mar", 3),
    ("abril", 4),
    ("abr", 4),
    ("mayo", 5),
    ("may", 5),
    ("junio", 6),
    ("jun", 6),
    ("julio", 7),
    ("jul", 7),
    ("agosto", 8),
    ("ago", 8),
    ("septiembre", 9),
    ("sep", 9),
    ("sept", 9),
    ("octubre", 10),
    ("oct", 10),
    ("noviembre", 11),
    ("nov", 11),
    ("diciembre", 12),
    ("dic", 12),
];

const QUARTERS: &[(&str, (u32, u32))] = &[
    ("q1", (1, 3)),
    ("primer trimestre", (1, 3)),
    ("1er trimestre", (1, 3)),
    ("q2", (4, 6)),
    ("segundo trimestre", (4, 6)),
    ("2do trimestre", (4, 6)),
    ("q3", (7, 9)),
    ("tercer trimestre", (7, 9)),
    ("3er trimestre", (7, 9)),
    ("q4", (10, 12)),
    ("cuarto trimestre", (10, 12)),
    ("4to trimestre", (10, 12)),
];

static COMPARISON_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bvs\.?\b",
        r"\bversus\b",
        r"\bcontra\b",
        r"\bcomparado?\s+con\b",
        r"\bcomparacion\s+(?:con|de|entre)\b",
        r"\bdiferencia\s+(?:con|entre)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static SPLIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*(?:vs\.?|versus|contra|comparado?\s+con|comparacion\s+(?:con|de)|diferencia\s+(?:con|entre))\s*").unwrap()
});

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

fn month_range(year: i32, month: u32) -> (NaiveDate, NaiveDate) {
    month_bounds(year, month)
}

/// Port of `extract_date_range`. Returns `None` when no recognizable date
/// expression is present.
pub fn extract_date_range(question: &str) -> Option<(NaiveDate, NaiveDate)> {
    let q = question.to_lowercase();
    let q = q.trim();
    let today = today();

    if word_present(q, "hoy") {
        return Some((today, today + Duration::days(1)));
    }
    if word_present(q, "ayer") {
        let yesterday = today - Duration::days(1);
        return Some((yesterday, today));
    }
    if phrase_present(q, "esta semana") {
        let start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        return Some((start, start + Duration::days(7)));
    }
    if phrase_present(q, "semana pasada")
        || phrase_present(q, "ultima semana")
        || phrase_present(q, "ultimas semana")
    {
        let this_week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let start = this_week_start - Duration::days(7);
        return Some((start, start + Duration::days(7)));
    }
    if phrase_present(q, "este mes") {
        return Some(month_range(today.year(), today.month()));
    }
    if phrase_present(q, "mes pasado") || phrase_present(q, "ultimo mes") {
        return Some(if today.month() == 1 {
            month_range(today.year() - 1, 12)
        } else {
            month_range(today.year(), today.month() - 1)
        });
    }

    static ULTIMOS_DIAS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bultimos?\s+(\d+)\s+dias?\b").unwrap());
    if let Some(caps) = ULTIMOS_DIAS.captures(q) {
        let days: i64 = caps[1].parse().unwrap_or(30);
        let start = today - Duration::days(days);
        return Some((start, today + Duration::days(1)));
    }
    static ULTIMAS_SEMANAS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\bultimas?\s+(\d+)\s+semanas?\b").unwrap());
    if let Some(caps) = ULTIMAS_SEMANAS.captures(q) {
        let weeks: i64 = caps[1].parse().unwrap_or(4);
        let start = today - Duration::weeks(weeks);
        return Some((start, today + Duration::days(1)));
    }

    // month + explicit year
    for (name, month_num) in SPANISH_MONTHS {
        let pattern = format!(r"\b{name}\s+(?:de\s+)?(\d{{4}})\b");
        if let Some(caps) = Regex::new(&pattern).unwrap().captures(q) {
            let year: i32 = caps[1].parse().unwrap_or_else(|_| today.year());
            return Some(month_range(year, *month_num));
        }
    }
    // bare month name, no trailing year
    for (name, month_num) in SPANISH_MONTHS {
        let pattern = format!(r"\b(?:en\s+)?{name}\b");
        if let Some(m) = Regex::new(&pattern).unwrap().find(q) {
            let after = &q[m.end()..];
            let has_trailing_year = Regex::new(r"^\s*(?:de\s+)?\d{4}").unwrap().is_match(after);
            if !has_trailing_year {
                return Some(month_range(today.year(), *month_num));
            }
        }
    }

    static YEAR_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").unwrap());
    if let Some(caps) = YEAR_ONLY.captures(q) {
        let mentions_month = SPANISH_MONTHS.iter().any(|(name, _)| q.contains(name));
        if !mentions_month && (word_present(q, "año") || word_present(q, "ano") || word_present(q, "year")) {
            let year: i32 = caps[1].parse().unwrap_or_else(|_| today.year());
            return Some((
                NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap(),
            ));
        }
    }

    for (name, (q_start, q_end)) in QUARTERS {
        let pattern = format!(r"\b{name}\s+(?:de\s+)?(\d{{4}})\b");
        if let Some(caps) = Regex::new(&pattern).unwrap().captures(q) {
            let year: i32 = caps[1].parse().unwrap_or_else(|_| today.year());
            let (from, _) = month_range(year, *q_start);
            let (_, to) = month_range(year, *q_end);
            return Some((from, to));
        }
    }

    static RANGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\bdel?\s+(\d{1,2})\s+al?\s+(\d{1,2})\s+de\s+(\w+)(?:\s+(?:de\s+)?(\d{4}))?\b")
            .unwrap()
    });
    if let Some(caps) = RANGE_PATTERN.captures(q) {
        let day_start: u32 = caps[1].parse().unwrap_or(1);
        let day_end: u32 = caps[2].parse().unwrap_or(1);
        let month_name = caps[3].to_string();
        let year: i32 = caps
            .get(4)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or_else(|| today.year());
        if let Some(month_num) = month_for_name(&month_name) {
            if let (Some(start), Some(end)) = (
                NaiveDate::from_ymd_opt(year, month_num, day_start),
                NaiveDate::from_ymd_opt(year, month_num, day_end),
            ) {
                return Some((start, end + Duration::days(1)));
            }
        }
    }

    static DAY_PATTERN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\b(\d{1,2})\s+de\s+(\w+)(?:\s+(?:de\s+)?(\d{4}))?\b").unwrap());
    if let Some(caps) = DAY_PATTERN.captures(q) {
        let day: u32 = caps[1].parse().unwrap_or(1);
        let month_name = caps[2].to_string();
        let year: i32 = caps
            .get(3)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or_else(|| today.year());
        if let Some(month_num) = month_for_name(&month_name) {
            if (1..=31).contains(&day) {
                if let Some(d) = NaiveDate::from_ymd_opt(year, month_num, day) {
                    return Some((d, d + Duration::days(1)));
                }
            }
        }
    }

    static EVENT_PATTERN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\b(cyber\s*monday|black\s*friday)\b").unwrap());
    if EVENT_PATTERN.is_match(q) {
        let year = YEAR_ONLY
            .captures(q)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or_else(|| today.year());
        return Some(month_range(year, 11));
    }

    None
}

fn month_for_name(name: &str) -> Option<u32> {
    SPANISH_MONTHS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, m)| *m)
}

fn word_present(q: &str, word: &str) -> bool {
    Regex::new(&format!(r"\b{}\b", regex::escape(word)))
        .unwrap()
        .is_match(q)
}

fn phrase_present(q: &str, phrase: &str) -> bool {
    let pattern = phrase.split_whitespace().collect::<Vec<_>>().join(r"\s+");
    Regex::new(&format!(r"\b{pattern}\b")).unwrap().is_match(q)
}

fn format_date_context(range: Option<(NaiveDate, NaiveDate)>) -> String {
    let Some((from, to)) = range else {
        return "ultimos 30 dias".to_string();
    };
    let inclusive_to = to - Duration::days(1);
    if from == inclusive_to {
        return from.format("%d/%m/%Y").to_string();
    }
    if from.year() == inclusive_to.year() && from.month() == inclusive_to.month() {
        let (month_start, month_end) = month_range(from.year(), from.month());
        if from == month_start && to == month_end {
            return format!("{} {}", spanish_month_name(from.month()), from.year());
        }
    }
    format!(
        "{} a {}",
        from.format("%d/%m/%Y"),
        inclusive_to.format("%d/%m/%Y")
    )
}

fn spanish_month_name(month: u32) -> &'static str {
    match month {
        1 => "enero",
        2 => "febrero",
        3 => "marzo",
        4 => "abril",
        5 => "mayo",
        6 => "junio",
        7 => "julio",
        8 => "agosto",
        9 => "septiembre",
        10 => "octubre",
        11 => "noviembre",
        _ => "diciembre",
    }
}

fn spanish_month_name_capitalized(month: u32) -> &'static str {
    match month {
        1 => "Enero",
        2 => "Febrero",
        3 => "Marzo",
        4 => "Abril",
        5 => "Mayo",
        6 => "Junio",
        7 => "Julio",
        8 => "Agosto",
        9 => "Septiembre",
        10 => "Octubre",
        11 => "Noviembre",
        _ => "Diciembre",
    }
}

pub fn is_comparison_query(question: &str) -> bool {
    let q = question.to_lowercase();
    COMPARISON_PATTERNS.iter().any(|re| re.is_match(&q))
}

fn extract_month_from_text(text: &str, default_year: i32) -> Option<(u32, i32)> {
    let text = text.to_lowercase();
    for (name, month_num) in SPANISH_MONTHS {
        let pattern = format!(r"\b{name}\s*(?:de\s+)?(\d{{4}})?\b");
        if let Some(caps) = Regex::new(&pattern).unwrap().captures(&text) {
            let year = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(default_year);
            return Some((*month_num, year));
        }
    }
    None
}

/// Port of `extract_comparison_dates`: detects a comparison and resolves
/// both periods, inferring the previous period as "the month before" when
/// the second clause carries no explicit date cue (rolling over a January
/// boundary).
pub fn extract_comparison_dates(question: &str) -> ComparisonDateRange {
    let today = today();

    if !is_comparison_query(question) {
        let range = extract_date_range(question);
        let label = format_date_context(range);
        let (from, to) = range.unwrap_or((today - Duration::days(30), today + Duration::days(1)));
        return ComparisonDateRange {
            is_comparison: false,
            current_period: DatePeriod {
                label,
                date_from: from,
                date_to: to,
            },
            previous_period: None,
        };
    }

    let q = question.to_lowercase();
    let parts: Vec<&str> = SPLIT_PATTERN.splitn(&q, 2).collect();
    if parts.len() < 2 {
        let range = extract_date_range(question);
        let label = format_date_context(range);
        let (from, to) = range.unwrap_or((today - Duration::days(30), today + Duration::days(1)));
        return ComparisonDateRange {
            is_comparison: false,
            current_period: DatePeriod {
                label,
                date_from: from,
                date_to: to,
            },
            previous_period: None,
        };
    }

    let (part1, part2) = (parts[0], parts[1]);

    let mut month1 = extract_month_from_text(part1, today.year());
    let mut month2 = extract_month_from_text(part2, today.year());

    if month1.is_none() {
        if let Some((from, _)) = extract_date_range(part1) {
            month1 = Some((from.month(), from.year()));
        }
    }
    if month2.is_none() {
        if let Some((from, _)) = extract_date_range(part2) {
            month2 = Some((from.month(), from.year()));
        }
    }

    if let (Some((m1, y1)), None) = (month1, month2) {
        if ["pasado", "anterior", "previo"].iter().any(|kw| part2.contains(kw)) {
            let (prev_month, prev_year) = if m1 > 1 { (m1 - 1, y1) } else { (12, y1 - 1) };
            month2 = Some((prev_month, prev_year));
        } else {
            for (name, month_num) in SPANISH_MONTHS {
                if part2.contains(name) {
                    month2 = Some(if *month_num > m1 { (*month_num, y1 - 1) } else { (*month_num, y1) });
                    break;
                }
            }
        }
    }

    if month2.is_some() && month1.is_none() {
        month1 = Some((today.month(), today.year()));
    }
    let month1 = month1.unwrap_or((today.month(), today.year()));
    let month2 = month2.unwrap_or_else(|| {
        if month1.0 > 1 {
            (month1.0 - 1, month1.1)
        } else {
            (12, month1.1 - 1)
        }
    });

    let (current_from, current_to) = month_range(month1.1, month1.0);
    let (previous_from, previous_to) = month_range(month2.1, month2.0);

    ComparisonDateRange {
        is_comparison: true,
        current_period: DatePeriod {
            label: format!("{} {}", spanish_month_name_capitalized(month1.0), month1.1),
            date_from: current_from,
            date_to: current_to,
        },
        previous_period: Some(DatePeriod {
            label: format!("{} {}", spanish_month_name_capitalized(month2.0), month2.1),
            date_from: previous_from,
            date_to: previous_to,
        }),
    }
}

const HAS_CLEAR_KEYWORDS: &[&str] = &[
    "inventario", "stock", "venta", "ventas", "producto", "orden", "ordenes", "agente",
    "escalado", "preventa", "kpi", "resumen", "dashboard", "vendido", "facturado", "revenue",
    "ingresos", "ticket", "enero", "febrero", "marzo", "abril", "mayo", "junio", "julio",
    "agosto", "septiembre", "octubre", "noviembre", "diciembre", "mes", "semana", "dia", "año",
    "hoy", "ayer", "ultimos", "reciente",
];

const AMBIGUOUS_REFS: &[&str] = &[
    "eso", "esto", "aquello", "lo mismo", "esos datos", "lo anterior", "mas de eso", "y de eso",
    "que mas", "amplia", "detalla",
];

/// Port of `_decide_queries_heuristic`'s `elif` chain. Branch order is
/// significant (see module docs).
fn keyword_route(q_lower: &str) -> Vec<&'static str> {
    if ["agente", "ai", "interacci", "bot", "asistente"]
        .iter()
        .any(|kw| q_lower.contains(kw))
    {
        let mut ids = vec!["ai_interactions_summary", "recent_ai_interactions"];
        if q_lower.contains("escalad") {
            ids.push("escalated_cases");
        }
        return ids;
    }
    if q_lower.contains("escalad") {
        return vec!["escalated_cases", "ai_interactions_summary"];
    }
    if [
        "enero", "febrero", "marzo", "abril", "mayo", "junio", "julio", "agosto", "septiembre",
        "octubre", "noviembre", "diciembre",
    ]
    .iter()
    .any(|kw| q_lower.contains(kw))
    {
        return vec!["kpi_sales_summary", "sales_by_month", "top_products_by_revenue"];
    }
    if ["ciclo", "estacionalidad", "temporada", "patron", "patrón"]
        .iter()
        .any(|kw| q_lower.contains(kw))
    {
        return vec!["kpi_sales_summary", "sales_by_month", "ts_sales_by_day"];
    }
    if [
        "mejor mes", "peor mes", "mes que mas", "mes que más", "cual mes", "cuál mes",
        "que mes", "qué mes",
    ]
    .iter()
    .any(|kw| q_lower.contains(kw))
    {
        return vec!["kpi_sales_summary", "sales_by_month", "top_products_by_revenue"];
    }
    if [
        "insight", "analisis profundo", "análisis profundo", "analiza todo", "resumen ejecutivo",
        "executive summary",
    ]
    .iter()
    .any(|kw| q_lower.contains(kw))
    {
        return vec!["kpi_sales_summary", "ts_sales_by_day", "top_products_by_revenue"];
    }
    if ["pareto", "80/20", "80-20", "concentracion", "concentración", "abc"]
        .iter()
        .any(|kw| q_lower.contains(kw))
    {
        return vec!["kpi_sales_summary", "top_products_by_revenue", "ts_sales_by_day"];
    }
    if ["ticket", "promedio de compra", "valor promedio", "orden promedio"]
        .iter()
        .any(|kw| q_lower.contains(kw))
    {
        return vec!["kpi_sales_summary", "ts_sales_by_day", "recent_orders"];
    }
    if [
        "mas vendido", "más vendido", "mas vendidos", "más vendidos", "top producto",
        "top productos", "mejores producto", "mejores productos",
    ]
    .iter()
    .any(|kw| q_lower.contains(kw))
    {
        return vec!["kpi_sales_summary", "top_products_by_revenue", "sales_by_month"];
    }
    if ["inventario", "stock", "existencia"].iter().any(|kw| q_lower.contains(kw)) {
        if ["bajo", "alerta", "falta", "critico", "crítico"]
            .iter()
            .any(|kw| q_lower.contains(kw))
        {
            return vec!["kpi_inventory_summary", "products_low_stock", "stock_reorder_analysis"];
        }
        return vec!["kpi_inventory_summary", "stock_reorder_analysis", "stock_alerts"];
    }
    if q_lower.contains("producto")
        && !["vendido", "venta", "revenue"].iter().any(|kw| q_lower.contains(kw))
    {
        return vec!["kpi_inventory_summary", "products_inventory", "top_products_by_sales"];
    }
    if ["venta", "factura", "ingreso", "revenue", "vendido", "vendieron", "facturado"]
        .iter()
        .any(|kw| q_lower.contains(kw))
    {
        return vec!["kpi_sales_summary", "ts_sales_by_day", "top_products_by_revenue"];
    }
    if [
        "quebrar", "quiebre", "agotar", "agotarse", "agotando", "faltante", "reponer",
        "reposicion", "reposición",
    ]
    .iter()
    .any(|kw| q_lower.contains(kw))
    {
        // reference implementation cites `ts_top_product_sales`, absent from
        // the allowlist; mapped to `ts_sales_by_day` (see DESIGN.md).
        return vec!["kpi_sales_summary", "stock_reorder_analysis", "ts_sales_by_day"];
    }
    if ["aumentar stock", "aumentar inventario", "ponderar", "priorizar", "debo comprar"]
        .iter()
        .any(|kw| q_lower.contains(kw))
    {
        // reference implementation returns 4 ids here; capped to 3 (see
        // DESIGN.md Open Question resolution), dropping the lowest-priority
        // `products_low_stock`.
        return vec!["kpi_sales_summary", "stock_reorder_analysis", "ts_sales_by_day"];
    }
    if ["preventa", "consulta", "pregunta"].iter().any(|kw| q_lower.contains(kw)) {
        return vec!["preventa_summary", "recent_preventa_queries"];
    }
    default_plan_ids()
}

fn default_plan_ids() -> Vec<&'static str> {
    vec!["kpi_sales_summary", "ts_sales_by_day", "top_products_by_revenue"]
}

/// Entry point: question + optional chat context -> QueryPlan.
///
/// Heuristics run first; the LLM is consulted only for anaphoric references
/// with chat context present, or unconditionally when `force_llm` is set
/// (mirrors `USE_LLM_PLANNER`).
pub async fn plan_queries(
    question: &str,
    chat_context: Option<&str>,
    force_llm: bool,
    llm: &dyn LlmClient,
) -> QueryPlan {
    let q_lower = question.to_lowercase();

    let has_clear_keywords = HAS_CLEAR_KEYWORDS.iter().any(|kw| q_lower.contains(kw));
    let has_ambiguous_refs = AMBIGUOUS_REFS.iter().any(|kw| q_lower.contains(kw));

    if has_clear_keywords && !has_ambiguous_refs && !force_llm {
        return QueryPlan::new(keyword_route(&q_lower).into_iter().map(str::to_string).collect());
    }

    let context = chat_context.unwrap_or_default();
    if (has_ambiguous_refs && !context.is_empty()) || force_llm {
        let available = Allowlist::available_queries();
        match llm.plan_queries(question, context, &available).await {
            Ok(ids) => {
                let valid_ids: Vec<String> = ids
                    .into_iter()
                    .filter(|id| Allowlist::validate(id))
                    .collect();
                if valid_ids.is_empty() {
                    return QueryPlan::new(vec![
                        "kpi_sales_summary".to_string(),
                        "ts_sales_by_day".to_string(),
                    ]);
                }
                return QueryPlan::new(valid_ids);
            }
            Err(err) => {
                tracing::warn!(error = %err, "planner llm fallback failed, using heuristics");
                return QueryPlan::new(keyword_route(&q_lower).into_iter().map(str::to_string).collect());
            }
        }
    }

    QueryPlan::new(keyword_route(&q_lower).into_iter().map(str::to_string).collect())
}

/// Build the param overrides (currently just `date_from`/`date_to`) for a
/// resolved date window, ready to merge into `Allowlist::build_params`.
pub fn date_params(range: Option<(NaiveDate, NaiveDate)>) -> HashMap<String, Value> {
    let mut params = HashMap::new();
    if let Some((from, to)) = range {
        params.insert("date_from".to_string(), Value::String(from.format("%Y-%m-%d").to_string()));
        params.insert("date_to".to_string(), Value::String(to.format("%Y-%m-%d").to_string()));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DemoLlmClient;

    #[test]
    fn parses_month_with_explicit_year() {
        let (from, to) = extract_date_range("ventas de diciembre 2024").unwrap();
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn month_and_year_pattern_takes_priority_over_day_pattern() {
        // "noviembre 2024" matches the month+year branch before the
        // day-specific "D de M" branch is ever tried, same ordering quirk as
        // `extract_date_range` in the reference implementation.
        let (from, to) = extract_date_range("que paso el 15 de noviembre 2024").unwrap();
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 11, 1).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
    }

    #[test]
    fn bare_month_name_without_year_defaults_to_current_year() {
        // Same ordering quirk: the bare-month branch also runs before the
        // day-specific branch, so a day mention never overrides a detected
        // month name.
        let (from, to) = extract_date_range("que paso el 15 de noviembre").unwrap();
        let year = today().year();
        assert_eq!(from, NaiveDate::from_ymd_opt(year, 11, 1).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(year, 12, 1).unwrap());
    }

    #[test]
    fn no_date_expression_returns_none() {
        assert!(extract_date_range("hola como estas").is_none());
    }

    #[test]
    fn comparison_infers_previous_month_across_january_boundary() {
        let range = extract_comparison_dates("ventas de enero 2025 vs mes anterior");
        assert!(range.is_comparison);
        let previous = range.previous_period.unwrap();
        assert_eq!(previous.label, "Diciembre 2024");
    }

    #[test]
    fn explicit_two_month_comparison_resolves_both_periods() {
        let range = extract_comparison_dates("diciembre 2025 vs noviembre");
        assert!(range.is_comparison);
        assert_eq!(range.current_period.label, "Diciembre 2025");
        let previous = range.previous_period.unwrap();
        assert_eq!(previous.label, "Noviembre 2025");
    }

    #[test]
    fn inventory_low_stock_branch_precedes_generic_inventory() {
        let ids = keyword_route("productos con stock bajo y critico");
        assert_eq!(
            ids,
            vec!["kpi_inventory_summary", "products_low_stock", "stock_reorder_analysis"]
        );
    }

    #[test]
    fn best_selling_product_branch_precedes_inventory_branch() {
        let ids = keyword_route("cual es el producto mas vendido");
        assert_eq!(
            ids,
            vec!["kpi_sales_summary", "top_products_by_revenue", "sales_by_month"]
        );
    }

    #[test]
    fn increase_stock_branch_is_capped_at_three_ids() {
        let ids = keyword_route("que deberia ponderar para la proxima compra");
        assert_eq!(
            ids,
            vec!["kpi_sales_summary", "stock_reorder_analysis", "ts_sales_by_day"]
        );
    }

    #[test]
    fn unmatched_question_falls_through_to_default_plan() {
        let ids = keyword_route("blablabla sin sentido");
        assert_eq!(ids, default_plan_ids());
    }

    #[tokio::test]
    async fn clear_keywords_bypass_llm_even_with_context() {
        let plan = plan_queries(
            "ventas de diciembre",
            Some("contexto previo"),
            false,
            &DemoLlmClient,
        )
        .await;
        assert!(plan.query_ids.contains(&"kpi_sales_summary".to_string()));
    }

    #[tokio::test]
    async fn ambiguous_reference_with_context_consults_llm() {
        let plan = plan_queries("y de eso que mas", Some("hablamos de inventario"), false, &DemoLlmClient).await;
        assert!(!plan.query_ids.is_empty());
        assert!(plan.query_ids.len() <= QueryPlan::MAX_IDS);
    }
}
