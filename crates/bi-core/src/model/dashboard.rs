use serde::{Deserialize, Serialize};

/// A single KPI tile. `value_ref` must resolve against the originating
/// payload's `available_refs` (e.g. `kpi.total_sales`); the Composer drops
/// any card whose ref does not resolve rather than emit a dangling pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiCardConfig {
    pub label: String,
    pub value_ref: String,
    pub format: KpiFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiFormat {
    Currency,
    Number,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    LineChart,
    AreaChart,
    BarChart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub title: String,
    pub dataset_ref: String,
    pub x_axis: String,
    pub y_axis: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub title: String,
    pub dataset_ref: String,
    pub columns: Vec<String>,
    pub max_rows: usize,
}

/// Dual-period comparison visual. Only metrics whose delta is defined (see
/// `ComparisonData::delta_pct`) are included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonChartConfig {
    pub title: String,
    pub dataset_ref: String,
    pub metrics: Vec<String>,
}

/// Tagged union of everything that can live in `slots.charts`. Carries an
/// explicit `type` discriminant on the wire rather than relying on structural
/// duck-typing, per SPEC_FULL.md §9 ("duck-typed... polymorphic slot
/// children").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SlotConfig {
    Chart(ChartConfig),
    Table(TableConfig),
    Comparison(ComparisonChartConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeKind {
    Headline,
    Summary,
    Insight,
    Callout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeBlock {
    #[serde(rename = "type")]
    pub kind: NarrativeKind,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardSlots {
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub series: Vec<KpiCardConfig>,
    #[serde(default)]
    pub charts: Vec<SlotConfig>,
    #[serde(default)]
    pub narrative: Vec<NarrativeBlock>,
}

/// Wire contract delivered to the client: the declarative description of
/// what must be rendered. Every ref inside `slots` has already been
/// validated against the originating payload's `available_refs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSpec {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub slots: DashboardSlots,
}

impl DashboardSpec {
    pub fn minimal(title: impl Into<String>, conclusion: impl Into<String>) -> Self {
        let conclusion = conclusion.into();
        Self {
            title: title.into(),
            subtitle: None,
            conclusion: Some(conclusion.clone()),
            generated_at: chrono::Utc::now(),
            slots: DashboardSlots {
                narrative: vec![NarrativeBlock {
                    kind: NarrativeKind::Summary,
                    text: conclusion,
                }],
                ..Default::default()
            },
        }
    }
}
