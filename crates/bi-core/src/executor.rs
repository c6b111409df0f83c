//! Data Executor (SPEC_FULL.md §4.4/§8). Runs a `QueryPlan` against a
//! `Database` driver and normalizes rows into a `DataPayload`, projecting by
//! each template's `output_type` exactly as `data_agent.py`'s `execute_plan`
//! does. A single query's failure does not abort the plan; the plan only
//! fails if every query in it failed.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::future::join_all;
use serde_json::Value;

use crate::allowlist::{Allowlist, OutputType, QueryTemplate};
use crate::error::{AppError, AppResult};
use crate::model::{
    ComparisonData, ComparisonPeriod, DataPayload, DatasetMeta, QueryPlan, TableData,
    TimeSeriesData, TimeSeriesPoint, TopItem, TopItemsData,
};

/// A row is a loosely-typed string-keyed map, the shape both a real SQL
/// driver and the demo fixture below produce.
pub type Row = BTreeMap<String, Value>;

#[async_trait]
pub trait Database: Send + Sync {
    async fn execute_query(
        &self,
        template: &QueryTemplate,
        params: &HashMap<String, Value>,
    ) -> AppResult<Vec<Row>>;

    /// Cheap connectivity probe for `GET /health`. The demo backend is
    /// trivially always up; `PostgresDatabase` overrides this with a real
    /// round trip against the pool.
    async fn ping(&self) -> bool {
        true
    }
}

/// Fan-out cap for concurrent query execution within one plan (SPEC_FULL.md
/// §5). `QueryPlan::MAX_IDS` is 3, so this never actually throttles a single
/// plan; it bounds the two-period comparison case and leaves headroom for a
/// future larger plan length without a code change.
const MAX_CONCURRENT_QUERIES: usize = 4;

async fn run_one(
    db: &dyn Database,
    id: &str,
    params: &HashMap<String, Value>,
) -> AppResult<(Vec<Row>, DatasetMeta)> {
    let template = Allowlist::get(id).ok_or_else(|| AppError::InvalidQuery(id.to_string()))?;
    let built_params = Allowlist::build_params(id, params)?;
    let start = Instant::now();
    let rows = db.execute_query(template, &built_params).await?;
    let meta = DatasetMeta {
        query_id: id.to_string(),
        row_count: rows.len(),
        execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        executed_at: chrono::Utc::now(),
    };
    Ok((rows, meta))
}

fn project_into_payload(payload: &mut DataPayload, template: &QueryTemplate, rows: Vec<Row>) {
    match template.output_type {
        OutputType::Kpi => {
            if let Some(row) = rows.into_iter().next() {
                let kpis: BTreeMap<String, f64> = row
                    .into_iter()
                    .filter_map(|(k, v)| v.as_f64().map(|v| (k, v)))
                    .collect();
                payload.merge_kpi_row(kpis);
            }
        }
        OutputType::TimeSeries => {
            let series_name = template
                .output_ref
                .rsplit('.')
                .next()
                .unwrap_or(template.id);
            let points = rows
                .iter()
                .map(|row| TimeSeriesPoint {
                    date: row
                        .get("bucket")
                        .or_else(|| row.get("date"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    value: row.get("value").and_then(|v| v.as_f64()).unwrap_or(0.0),
                    label: None,
                })
                .collect();
            payload.add_time_series(TimeSeriesData {
                series_name: series_name.to_string(),
                points,
            });
        }
        OutputType::TopItems => {
            let ranking_name = template
                .output_ref
                .rsplit('.')
                .next()
                .unwrap_or(template.id);
            let items = rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    let mut extra = None;
                    if let Some(units) = row.get("units_sold") {
                        let mut map = BTreeMap::new();
                        map.insert("units_sold".to_string(), units.clone());
                        extra = Some(map);
                    }
                    TopItem {
                        rank: row
                            .get("rank")
                            .and_then(|v| v.as_u64())
                            .map(|v| v as usize)
                            .unwrap_or(i + 1),
                        id: row
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        title: row
                            .get("title")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        value: row
                            .get("value")
                            .or_else(|| row.get("revenue"))
                            .or_else(|| row.get("units_sold"))
                            .and_then(|v| v.as_f64())
                            .unwrap_or(0.0),
                        extra,
                    }
                })
                .collect();
            payload.add_top_items(TopItemsData {
                ranking_name: ranking_name.to_string(),
                items,
                metric: "revenue".to_string(),
            });
        }
        OutputType::Table => {
            let name = template
                .output_ref
                .strip_prefix("table.")
                .unwrap_or(template.output_ref);
            payload.add_table(TableData {
                name: name.to_string(),
                rows,
            });
        }
    }
}

/// Execute every id in `plan` against `db`, merging successful results into
/// one `DataPayload`. Returns an error only when every query failed; a
/// partial success is returned as `Ok` with whichever datasets succeeded.
pub async fn execute_plan(
    plan: &QueryPlan,
    db: &dyn Database,
    date_range: Option<(NaiveDate, NaiveDate)>,
) -> AppResult<DataPayload> {
    let mut base_params = plan.params.clone();
    if let Some((from, to)) = date_range {
        base_params
            .entry("date_from".to_string())
            .or_insert_with(|| Value::String(from.format("%Y-%m-%d").to_string()));
        base_params
            .entry("date_to".to_string())
            .or_insert_with(|| Value::String(to.format("%Y-%m-%d").to_string()));
    }

    let ids: Vec<&str> = plan.query_ids.iter().map(String::as_str).collect();
    let mut payload = DataPayload::default();
    let mut last_error: Option<AppError> = None;
    let mut any_succeeded = false;

    for chunk in ids.chunks(MAX_CONCURRENT_QUERIES) {
        let futures = chunk.iter().map(|id| run_one(db, id, &base_params));
        let results = join_all(futures).await;
        for (id, result) in chunk.iter().zip(results) {
            match result {
                Ok((rows, meta)) => {
                    any_succeeded = true;
                    payload.datasets_meta.push(meta);
                    if let Some(template) = Allowlist::get(id) {
                        project_into_payload(&mut payload, template, rows);
                    }
                }
                Err(err) => {
                    tracing::warn!(query_id = %id, error = %err, "query execution failed, continuing plan");
                    last_error = Some(err);
                }
            }
        }
    }

    if !any_succeeded {
        return Err(last_error.unwrap_or_else(|| AppError::Internal("empty query plan".to_string())));
    }
    Ok(payload)
}

/// Comparison-mode execution: runs the same plan against both periods and
/// assembles the delta structure (SPEC_FULL.md §4.4, `DataAgent.run`).
pub async fn execute_comparison(
    plan: &QueryPlan,
    db: &dyn Database,
    current: (String, NaiveDate, NaiveDate),
    previous: (String, NaiveDate, NaiveDate),
) -> AppResult<DataPayload> {
    let (current_label, current_from, current_to) = current;
    let (previous_label, previous_from, previous_to) = previous;

    let mut current_payload = execute_plan(plan, db, Some((current_from, current_to))).await?;
    let previous_payload = execute_plan(plan, db, Some((previous_from, previous_to)))
        .await
        .unwrap_or_default();

    let get = |payload: &DataPayload, key: &str| payload.kpis.get(key).copied();
    let metric_delta = |key: &str| {
        ComparisonData::delta_pct(
            get(&current_payload, key),
            get(&previous_payload, key),
        )
    };

    let (delta_sales, delta_sales_pct) = metric_delta("total_sales");
    let (delta_orders, delta_orders_pct) = metric_delta("total_orders");
    let (delta_avg_order, delta_avg_order_pct) = metric_delta("avg_order_value");
    let (delta_units, delta_units_pct) = metric_delta("total_units");

    let comparison = ComparisonData {
        is_comparison: true,
        current_period: ComparisonPeriod {
            label: current_label,
            date_from: current_from,
            date_to: current_to,
            kpis: current_payload.kpis.clone(),
        },
        previous_period: ComparisonPeriod {
            label: previous_label,
            date_from: previous_from,
            date_to: previous_to,
            kpis: previous_payload.kpis.clone(),
        },
        delta_sales,
        delta_sales_pct,
        delta_orders,
        delta_orders_pct,
        delta_avg_order,
        delta_avg_order_pct,
        delta_units,
        delta_units_pct,
    };
    current_payload.set_comparison(comparison);
    Ok(current_payload)
}

/// Synthetic fixture backing `DEMO_MODE`: deterministic-shaped rows per
/// template id so the pipeline runs end-to-end with zero external services.
/// Not randomized (per-call `Math.random()`-style jitter would make demo
/// responses non-reproducible across requests).
pub struct DemoDatabase;

#[async_trait]
impl Database for DemoDatabase {
    async fn execute_query(
        &self,
        template: &QueryTemplate,
        _params: &HashMap<String, Value>,
    ) -> AppResult<Vec<Row>> {
        Ok(demo_rows(template.id))
    }
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn demo_rows(id: &str) -> Vec<Row> {
    match id {
        "kpi_sales_summary" => vec![row(&[
            ("total_sales", Value::from(1_254_300.50)),
            ("total_orders", Value::from(842)),
            ("avg_order_value", Value::from(1489.67)),
            ("total_units", Value::from(1930)),
        ])],
        "kpi_inventory_summary" => vec![row(&[
            ("critical_count", Value::from(4)),
            ("warning_count", Value::from(11)),
            ("ok_count", Value::from(163)),
            ("total_products", Value::from(178)),
        ])],
        "ai_interactions_summary" => vec![row(&[
            ("total", Value::from(512)),
            ("escalated_count", Value::from(38)),
            ("auto_responded", Value::from(401)),
            ("resueltos", Value::from(470)),
            ("pendientes", Value::from(42)),
        ])],
        "preventa_summary" => vec![row(&[
            ("total_queries", Value::from(96)),
            ("answered", Value::from(81)),
            ("pending", Value::from(15)),
        ])],
        "ts_sales_by_day" | "sales_by_month" => (0..12)
            .map(|i| {
                row(&[
                    ("bucket", Value::String(format!("2025-{:02}-01", i + 1))),
                    ("value", Value::from(80_000.0 + (i as f64) * 5_200.0)),
                ])
            })
            .collect(),
        "top_products_by_revenue" => vec![
            row(&[
                ("id", Value::from("SKU-1001")),
                ("title", Value::String("Auriculares Inalambricos Pro".to_string())),
                ("revenue", Value::from(182_340.0)),
            ]),
            row(&[
                ("id", Value::from("SKU-1042")),
                ("title", Value::String("Cargador Rapido 65W".to_string())),
                ("revenue", Value::from(97_220.0)),
            ]),
            row(&[
                ("id", Value::from("SKU-2210")),
                ("title", Value::String("Mochila Antirrobo".to_string())),
                ("revenue", Value::from(64_100.0)),
            ]),
        ],
        "top_products_by_sales" => vec![
            row(&[
                ("id", Value::from("SKU-1001")),
                ("title", Value::String("Auriculares Inalambricos Pro".to_string())),
                ("units_sold", Value::from(340)),
            ]),
            row(&[
                ("id", Value::from("SKU-1042")),
                ("title", Value::String("Cargador Rapido 65W".to_string())),
                ("units_sold", Value::from(210)),
            ]),
        ],
        "interactions_by_case_type" => vec![
            row(&[
                ("id", Value::from("envio")),
                ("title", Value::String("Envio".to_string())),
                ("value", Value::from(188)),
            ]),
            row(&[
                ("id", Value::from("garantia")),
                ("title", Value::String("Garantia".to_string())),
                ("value", Value::from(94)),
            ]),
        ],
        "sales_by_channel" => vec![
            row(&[
                ("id", Value::from("envio_gratis")),
                ("title", Value::String("Envio gratis".to_string())),
                ("value", Value::from(612_000.0)),
            ]),
            row(&[
                ("id", Value::from("envio_flex")),
                ("title", Value::String("Flex".to_string())),
                ("value", Value::from(420_500.0)),
            ]),
        ],
        "products_low_stock" | "stock_alerts" | "stock_reorder_analysis" => vec![
            row(&[
                ("id", Value::from("SKU-3301")),
                ("title", Value::String("Funda de Silicona".to_string())),
                ("available_quantity", Value::from(2)),
            ]),
            row(&[
                ("id", Value::from("SKU-3455")),
                ("title", Value::String("Cable USB-C 1m".to_string())),
                ("available_quantity", Value::from(6)),
            ]),
        ],
        "products_inventory" => vec![row(&[
            ("id", Value::from("SKU-1001")),
            ("title", Value::String("Auriculares Inalambricos Pro".to_string())),
            ("available_quantity", Value::from(54)),
            ("status", Value::String("active".to_string())),
        ])],
        "recent_orders" | "recent_ai_interactions" | "escalated_cases"
        | "recent_preventa_queries" => vec![row(&[
            ("id", Value::from(1)),
            ("status", Value::String("paid".to_string())),
            ("total_amount", Value::from(15_200.0)),
        ])],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn executes_plan_and_populates_refs() {
        let plan = QueryPlan::new(vec![
            "kpi_sales_summary".to_string(),
            "ts_sales_by_day".to_string(),
            "top_products_by_revenue".to_string(),
        ]);
        let payload = execute_plan(&plan, &DemoDatabase, Some((date(2025, 1, 1), date(2025, 2, 1))))
            .await
            .unwrap();
        assert!(payload.available_refs.contains("kpi.total_sales"));
        assert_eq!(payload.time_series.len(), 1);
        assert_eq!(payload.top_items.len(), 1);
    }

    #[tokio::test]
    async fn unknown_id_does_not_abort_plan_when_others_succeed() {
        let plan = QueryPlan::new(vec![
            "does_not_exist".to_string(),
            "kpi_sales_summary".to_string(),
        ]);
        let payload = execute_plan(&plan, &DemoDatabase, None).await.unwrap();
        assert!(payload.available_refs.contains("kpi.total_sales"));
    }

    #[tokio::test]
    async fn all_failed_queries_propagate_an_error() {
        let plan = QueryPlan::new(vec!["does_not_exist".to_string()]);
        let result = execute_plan(&plan, &DemoDatabase, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn comparison_mode_computes_defined_deltas() {
        let plan = QueryPlan::new(vec!["kpi_sales_summary".to_string()]);
        let payload = execute_comparison(
            &plan,
            &DemoDatabase,
            ("Diciembre 2025".to_string(), date(2025, 12, 1), date(2026, 1, 1)),
            ("Noviembre 2025".to_string(), date(2025, 11, 1), date(2025, 12, 1)),
        )
        .await
        .unwrap();
        let comparison = payload.comparison.unwrap();
        assert!(comparison.is_comparison);
        assert!(comparison.delta_sales_pct.is_some());
    }
}
