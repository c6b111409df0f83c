use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub query_id: String,
    pub row_count: usize,
    pub execution_time_ms: f64,
    pub executed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesData {
    pub series_name: String,
    pub points: Vec<TimeSeriesPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopItem {
    pub rank: usize,
    pub id: String,
    pub title: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopItemsData {
    pub ranking_name: String,
    pub items: Vec<TopItem>,
    #[serde(default = "default_metric")]
    pub metric: String,
}

fn default_metric() -> String {
    "revenue".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableData {
    pub name: String,
    pub rows: Vec<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonPeriod {
    pub label: String,
    pub date_from: chrono::NaiveDate,
    pub date_to: chrono::NaiveDate,
    pub kpis: BTreeMap<String, f64>,
}

/// Dual-period execution result: a labelled current and previous period plus
/// the deltas between them. `delta_*_pct` is `None` rather than an infinity
/// or NaN artifact when the previous value was zero or absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonData {
    pub is_comparison: bool,
    pub current_period: ComparisonPeriod,
    pub previous_period: ComparisonPeriod,
    pub delta_sales: Option<f64>,
    pub delta_sales_pct: Option<f64>,
    pub delta_orders: Option<f64>,
    pub delta_orders_pct: Option<f64>,
    pub delta_avg_order: Option<f64>,
    pub delta_avg_order_pct: Option<f64>,
    pub delta_units: Option<f64>,
    pub delta_units_pct: Option<f64>,
}

impl ComparisonData {
    /// `Δ/previous × 100`, rounded to 2 decimals; `None` when either value is
    /// absent or `previous == 0` (avoids a division-by-zero artifact).
    pub fn delta_pct(current: Option<f64>, previous: Option<f64>) -> (Option<f64>, Option<f64>) {
        match (current, previous) {
            (Some(c), Some(p)) if p != 0.0 => {
                let delta = c - p;
                (Some(delta), Some((delta / p * 100.0 * 100.0).round() / 100.0))
            }
            (Some(c), Some(p)) => (Some(c - p), None),
            _ => (None, None),
        }
    }
}

/// Normalized result of executing one QueryPlan. `available_refs` is the
/// authoritative set of dataset references the Composer may bind to; a ref
/// is present iff the payload actually contains the data it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataPayload {
    #[serde(default)]
    pub kpis: BTreeMap<String, f64>,
    #[serde(default)]
    pub time_series: Vec<TimeSeriesData>,
    #[serde(default)]
    pub top_items: Vec<TopItemsData>,
    #[serde(default)]
    pub tables: Vec<TableData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonData>,
    #[serde(default)]
    pub datasets_meta: Vec<DatasetMeta>,
    #[serde(default)]
    pub available_refs: HashSet<String>,
}

impl DataPayload {
    pub fn merge_kpi_row(&mut self, row: BTreeMap<String, f64>) {
        for (key, value) in row {
            self.available_refs.insert(format!("kpi.{key}"));
            self.kpis.insert(key, value);
        }
    }

    pub fn add_time_series(&mut self, series: TimeSeriesData) {
        self.available_refs
            .insert(format!("ts.{}", series.series_name));
        self.time_series.push(series);
    }

    pub fn add_top_items(&mut self, top: TopItemsData) {
        self.available_refs
            .insert(format!("top.{}", top.ranking_name));
        self.top_items.push(top);
    }

    pub fn add_table(&mut self, table: TableData) {
        self.available_refs.insert(format!("table.{}", table.name));
        self.tables.push(table);
    }

    pub fn set_comparison(&mut self, comparison: ComparisonData) {
        self.available_refs.insert("comparison".to_string());
        self.comparison = Some(comparison);
    }
}
