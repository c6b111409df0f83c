//! Presentation Composer (SPEC_FULL.md §4.5). Builds a `DashboardSpec` from a
//! `DataPayload` with deterministic heuristics, attaches a narrative (either
//! heuristic or LLM-generated), drops any slot whose ref does not resolve
//! against the payload, and backfills a second chart type when only one is
//! present. Faithfully ported from `presentation_agent.py`'s
//! `_build_spec_heuristic` / `_generate_smart_narrative` / `validate_refs` /
//! `_ensure_two_charts`.

use crate::llm::LlmClient;
use crate::model::{
    ChartConfig, ChartKind, ComparisonChartConfig, DashboardSlots, DashboardSpec, DataPayload,
    KpiCardConfig, KpiFormat, NarrativeBlock, NarrativeKind, SlotConfig, TableConfig, Trend,
};

/// `label, ref, format` triples tried in order for the non-comparison KPI
/// row, verbatim from the `all_kpis` table in `_build_spec_heuristic`.
const ALL_KPIS: &[(&str, &str, KpiFormat)] = &[
    ("Ventas Totales", "kpi.total_sales", KpiFormat::Currency),
    ("Ordenes", "kpi.total_orders", KpiFormat::Number),
    ("Ticket Promedio", "kpi.avg_order_value", KpiFormat::Currency),
    ("Unidades", "kpi.total_units", KpiFormat::Number),
    ("Total Interacciones", "kpi.total_interactions", KpiFormat::Number),
    ("Casos Escalados", "kpi.escalated_count", KpiFormat::Number),
    ("Tasa Escalamiento", "kpi.escalation_rate", KpiFormat::Percent),
    ("Auto-Respondidas", "kpi.auto_responded", KpiFormat::Number),
    ("Tasa Auto-Respuesta", "kpi.auto_response_rate", KpiFormat::Percent),
    ("Consultas Totales", "kpi.total_queries", KpiFormat::Number),
    ("Respondidas", "kpi.answered", KpiFormat::Number),
    ("Pendientes", "kpi.pending", KpiFormat::Number),
    ("Tasa Respuesta", "kpi.answer_rate", KpiFormat::Percent),
];

fn format_title(name: &str) -> String {
    let spaced = name.replace(['_', '.'], " ");
    spaced
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn generate_title(question: &str) -> String {
    let q = question.to_lowercase();
    if q.contains("venta") {
        "Dashboard de Ventas".to_string()
    } else if q.contains("producto") {
        "Analisis de Productos".to_string()
    } else if q.contains("orden") || q.contains("pedido") {
        "Resumen de Ordenes".to_string()
    } else {
        "Dashboard de Insights".to_string()
    }
}

fn trend_for(delta: Option<f64>) -> Option<Trend> {
    delta.map(|d| {
        if d > 0.0 {
            Trend::Up
        } else if d < 0.0 {
            Trend::Down
        } else {
            Trend::Neutral
        }
    })
}

/// Step 1 of `run()`: build the spec from pure heuristics, no LLM involved.
fn build_spec_heuristic(question: &str, payload: &DataPayload) -> DashboardSpec {
    let mut slots = DashboardSlots::default();

    if let Some(comp) = payload.comparison.as_ref().filter(|c| c.is_comparison) {
        let mut metrics_available = Vec::new();
        if comp.delta_sales.is_some() {
            metrics_available.push("total_sales".to_string());
        }
        if comp.delta_orders.is_some() {
            metrics_available.push("total_orders".to_string());
        }
        if comp.delta_avg_order.is_some() {
            metrics_available.push("avg_order_value".to_string());
        }
        if comp.delta_units.is_some() {
            metrics_available.push("total_units".to_string());
        }

        let title = format!(
            "Comparativa: {} vs {}",
            comp.current_period.label, comp.previous_period.label
        );

        if !metrics_available.is_empty() {
            slots.charts.push(SlotConfig::Comparison(ComparisonChartConfig {
                title: title.clone(),
                dataset_ref: "comparison".to_string(),
                metrics: metrics_available,
            }));
        }

        let kpi_configs: &[(&str, &str, KpiFormat, Option<f64>)] = &[
            ("Ventas", "kpi.total_sales", KpiFormat::Currency, comp.delta_sales_pct),
            ("Ordenes", "kpi.total_orders", KpiFormat::Number, comp.delta_orders_pct),
            ("Ticket Promedio", "kpi.avg_order_value", KpiFormat::Currency, comp.delta_avg_order_pct),
            ("Unidades", "kpi.total_units", KpiFormat::Number, comp.delta_units_pct),
        ];
        for (label, value_ref, format, delta) in kpi_configs {
            if payload.available_refs.contains(*value_ref) {
                let suffix = value_ref.rsplit('.').next().unwrap_or_default();
                slots.series.push(KpiCardConfig {
                    label: label.to_string(),
                    value_ref: value_ref.to_string(),
                    format: *format,
                    delta_ref: delta.map(|_| format!("comparison.delta_{suffix}_pct")),
                    trend: trend_for(*delta),
                });
            }
        }

        for ts in &payload.time_series {
            let dataset_ref = format!("ts.{}", ts.series_name);
            if payload.available_refs.contains(&dataset_ref) {
                slots.charts.push(SlotConfig::Chart(ChartConfig {
                    kind: ChartKind::LineChart,
                    title: format!("Tendencia: {}", format_title(&ts.series_name)),
                    dataset_ref,
                    x_axis: "date".to_string(),
                    y_axis: "value".to_string(),
                }));
            }
        }
        for top in &payload.top_items {
            let dataset_ref = format!("top.{}", top.ranking_name);
            if payload.available_refs.contains(&dataset_ref) {
                slots.charts.push(SlotConfig::Chart(ChartConfig {
                    kind: ChartKind::BarChart,
                    title: format_title(&top.ranking_name),
                    dataset_ref,
                    x_axis: "title".to_string(),
                    y_axis: "value".to_string(),
                }));
            }
        }

        return DashboardSpec {
            title,
            subtitle: Some(format!("Generado: {}", chrono::Utc::now().format("%d/%m/%Y %H:%M"))),
            conclusion: None,
            generated_at: chrono::Utc::now(),
            slots,
        };
    }

    if !payload.kpis.is_empty() {
        for (label, value_ref, format) in ALL_KPIS {
            if payload.available_refs.contains(*value_ref) {
                slots.series.push(KpiCardConfig {
                    label: label.to_string(),
                    value_ref: value_ref.to_string(),
                    format: *format,
                    delta_ref: None,
                    trend: None,
                });
            }
        }
    }

    for ts in &payload.time_series {
        let dataset_ref = format!("ts.{}", ts.series_name);
        if payload.available_refs.contains(&dataset_ref) {
            let kind = if ts.series_name.to_lowercase().contains("revenue") {
                ChartKind::AreaChart
            } else {
                ChartKind::LineChart
            };
            slots.charts.push(SlotConfig::Chart(ChartConfig {
                kind,
                title: format_title(&ts.series_name),
                dataset_ref,
                x_axis: "date".to_string(),
                y_axis: "value".to_string(),
            }));
        }
    }

    for top in &payload.top_items {
        let dataset_ref = format!("top.{}", top.ranking_name);
        if payload.available_refs.contains(&dataset_ref) {
            slots.charts.push(SlotConfig::Chart(ChartConfig {
                kind: ChartKind::BarChart,
                title: format_title(&top.ranking_name),
                dataset_ref,
                x_axis: "title".to_string(),
                y_axis: "value".to_string(),
            }));
        }
    }

    if let Some(table) = payload.tables.first() {
        let dataset_ref = format!("table.{}", table.name);
        if payload.available_refs.contains(&dataset_ref) {
            let columns: Vec<String> = table
                .rows
                .first()
                .map(|row| row.keys().take(5).cloned().collect())
                .unwrap_or_default();
            slots.charts.push(SlotConfig::Table(TableConfig {
                title: "Datos Detallados".to_string(),
                dataset_ref,
                columns,
                max_rows: 10,
            }));
        }
    }

    DashboardSpec {
        title: generate_title(question),
        subtitle: Some(format!("Generado: {}", chrono::Utc::now().format("%d/%m/%Y %H:%M"))),
        conclusion: None,
        generated_at: chrono::Utc::now(),
        slots,
    }
}

fn narrative(kind: NarrativeKind, text: impl Into<String>) -> NarrativeBlock {
    NarrativeBlock { kind, text: text.into() }
}

/// Step 2 (heuristic path): pattern-matches over KPIs/time-series/top-items
/// to produce Spanish-language narrative blocks without calling a model.
/// Ported from `_generate_smart_narrative`.
fn generate_smart_narrative(payload: &DataPayload) -> Vec<NarrativeBlock> {
    let mut narratives = Vec::new();
    let mut insights: Vec<String> = Vec::new();

    if let Some(comp) = payload.comparison.as_ref().filter(|c| c.is_comparison) {
        let curr = &comp.current_period;
        let prev = &comp.previous_period;
        narratives.push(narrative(
            NarrativeKind::Headline,
            format!("Comparativa: {} vs {}", curr.label, prev.label),
        ));

        if let (Some(delta), Some(delta_pct)) = (comp.delta_sales, comp.delta_sales_pct) {
            let direction = if delta > 0.0 { "crecieron" } else { "disminuyeron" };
            let curr_sales = curr.kpis.get("total_sales").copied().unwrap_or(0.0);
            let prev_sales = prev.kpis.get("total_sales").copied().unwrap_or(0.0);
            insights.push(format!(
                "Las ventas {direction} un {:.1}% (${curr_sales:.0} vs ${prev_sales:.0}), una diferencia de ${:.0}.",
                delta_pct.abs(),
                delta.abs(),
            ));
            if delta_pct.abs() > 30.0 {
                insights.push(if delta > 0.0 {
                    "Crecimiento excepcional. Analizar factores de exito para replicar.".to_string()
                } else {
                    "Caida significativa. Requiere accion inmediata.".to_string()
                });
            } else if delta_pct.abs() > 10.0 {
                insights.push(if delta > 0.0 {
                    "Buen crecimiento sostenido respecto al periodo anterior.".to_string()
                } else {
                    "Caida moderada. Revisar estrategia comercial.".to_string()
                });
            }
        }

        if let (Some(delta), Some(delta_pct)) = (comp.delta_orders, comp.delta_orders_pct) {
            let direction = if delta > 0.0 { "aumentaron" } else { "disminuyeron" };
            let curr_orders = curr.kpis.get("total_orders").copied().unwrap_or(0.0);
            let prev_orders = prev.kpis.get("total_orders").copied().unwrap_or(0.0);
            insights.push(format!(
                "Las ordenes {direction} un {:.1}% ({curr_orders:.0} vs {prev_orders:.0}).",
                delta_pct.abs(),
            ));
        }

        if let (Some(delta), Some(delta_pct)) = (comp.delta_avg_order, comp.delta_avg_order_pct) {
            if delta_pct.abs() > 5.0 {
                let direction = if delta > 0.0 { "subio" } else { "bajo" };
                let curr_avg = curr.kpis.get("avg_order_value").copied().unwrap_or(0.0);
                let prev_avg = prev.kpis.get("avg_order_value").copied().unwrap_or(0.0);
                insights.push(format!(
                    "El ticket promedio {direction} un {:.1}% (${curr_avg:.0} vs ${prev_avg:.0}).",
                    delta_pct.abs(),
                ));
            }
        }

        if let (Some(delta), Some(delta_pct)) = (comp.delta_units, comp.delta_units_pct) {
            let direction = if delta > 0.0 { "aumentaron" } else { "disminuyeron" };
            let curr_units = curr.kpis.get("total_units").copied().unwrap_or(0.0);
            let prev_units = prev.kpis.get("total_units").copied().unwrap_or(0.0);
            insights.push(format!(
                "Las unidades vendidas {direction} un {:.1}% ({curr_units:.0} vs {prev_units:.0}).",
                delta_pct.abs(),
            ));
        }

        for insight in insights.into_iter().take(5) {
            narratives.push(narrative(NarrativeKind::Insight, insight));
        }

        if let Some(delta_pct) = comp.delta_sales_pct {
            let callout = if delta_pct < -10.0 {
                "Recomendacion: Revisar causas de la caida. Considerar promociones, revision de precios o refuerzo de marketing."
            } else if delta_pct > 20.0 {
                "Recomendacion: Capitalizar el momentum positivo. Expandir inventario de productos estrella."
            } else {
                "Recomendacion: Rendimiento estable. Enfocarse en optimizacion y eficiencia."
            };
            narratives.push(narrative(NarrativeKind::Callout, callout));
        }

        return narratives;
    }

    if !payload.kpis.is_empty() {
        let kpis = &payload.kpis;
        if let (Some(&total_sales), Some(&total_orders)) =
            (kpis.get("total_sales"), kpis.get("total_orders"))
        {
            let avg_ticket = kpis.get("avg_order_value").copied().unwrap_or_else(|| {
                if total_orders > 0.0 { total_sales / total_orders } else { 0.0 }
            });
            let units = kpis.get("total_units").copied().unwrap_or(0.0);
            let units_per_order = if total_orders > 0.0 { units / total_orders } else { 0.0 };

            narratives.push(narrative(
                NarrativeKind::Headline,
                format!("Facturacion de ${total_sales:.0} en {total_orders:.0} ordenes procesadas."),
            ));

            if avg_ticket > 100_000.0 {
                insights.push(format!(
                    "Ticket promedio alto (${avg_ticket:.0}) indica productos de alto valor o compras en bulk."
                ));
            } else if avg_ticket > 50_000.0 {
                insights.push(format!("Ticket promedio saludable de ${avg_ticket:.0} con buena conversion."));
            } else {
                insights.push(format!("Ticket promedio de ${avg_ticket:.0}. Considerar estrategias de upselling."));
            }

            if units > 0.0 {
                if units_per_order > 2.0 {
                    insights.push(format!(
                        "Promedio de {units_per_order:.1} unidades/orden sugiere compras multiples o bundles efectivos."
                    ));
                } else {
                    insights.push(format!(
                        "{units:.0} unidades vendidas. Oportunidad de incrementar items por carrito."
                    ));
                }
            }
        } else if let Some(&interactions) = kpis.get("total_interactions") {
            let esc_rate = kpis.get("escalation_rate").copied().unwrap_or(0.0);
            narratives.push(narrative(
                NarrativeKind::Headline,
                format!(
                    "Agente AI proceso {interactions:.0} interacciones con {:.1}% resolucion automatica.",
                    100.0 - esc_rate
                ),
            ));
            if esc_rate < 10.0 {
                insights.push(format!(
                    "Excelente tasa de escalamiento ({esc_rate:.1}%). El AI resuelve la mayoria de consultas."
                ));
            } else if esc_rate < 25.0 {
                insights.push(format!(
                    "Tasa de escalamiento moderada ({esc_rate:.1}%). Revisar casos comunes para mejorar."
                ));
            } else {
                insights.push(format!(
                    "Alta tasa de escalamiento ({esc_rate:.1}%). Requiere entrenamiento adicional del modelo."
                ));
            }
        }
    }

    for ts in &payload.time_series {
        if ts.points.len() < 2 {
            continue;
        }
        let values: Vec<f64> = ts.points.iter().map(|p| p.value).collect();
        let first_val = values[0];
        let last_val = *values.last().unwrap();
        let max_val = values.iter().cloned().fold(f64::MIN, f64::max);
        let min_val = values.iter().cloned().fold(f64::MAX, f64::min);
        let avg_val = values.iter().sum::<f64>() / values.len() as f64;
        let change_pct = if first_val > 0.0 { (last_val - first_val) / first_val * 100.0 } else { 0.0 };
        let volatility = if avg_val > 0.0 { (max_val - min_val) / avg_val * 100.0 } else { 0.0 };
        let peak_idx = values.iter().position(|v| *v == max_val).unwrap_or(0);
        let peak_date = ts.points.get(peak_idx).map(|p| p.date.as_str()).unwrap_or("N/A");

        if ts.series_name.to_lowercase().contains("sales") {
            if change_pct > 10.0 {
                insights.push(format!("Tendencia alcista (+{change_pct:.1}%) en el periodo. Momentum positivo de ventas."));
            } else if change_pct < -10.0 {
                insights.push(format!("Tendencia bajista ({change_pct:.1}%). Analizar factores de mercado y competencia."));
            } else {
                insights.push(format!("Ventas estables (variacion {change_pct:+.1}%). Mercado en consolidacion."));
            }
            if volatility > 50.0 {
                insights.push(format!("Alta volatilidad detectada. Pico maximo el {peak_date} con ${max_val:.0}."));
            }
        }
    }

    for top in &payload.top_items {
        if top.items.len() < 3 {
            continue;
        }
        let items = &top.items[..top.items.len().min(10)];
        let total_top_value: f64 = items.iter().map(|i| i.value).sum();
        let top1_value = items[0].value;
        let top3_value: f64 = items[..items.len().min(3)].iter().map(|i| i.value).sum();
        let concentration = if total_top_value > 0.0 { top1_value / total_top_value * 100.0 } else { 0.0 };
        let top3_concentration = if total_top_value > 0.0 { top3_value / total_top_value * 100.0 } else { 0.0 };
        let star_product: String = items[0].title.chars().take(50).collect();

        insights.push(format!("Producto estrella: '{star_product}' lidera con ${top1_value:.0}."));
        if concentration > 30.0 {
            insights.push(format!("Alta concentracion ({concentration:.0}% en #1). Diversificar para reducir riesgo."));
        } else if top3_concentration > 60.0 {
            insights.push(format!("Top 3 concentra {top3_concentration:.0}% de ingresos. Portafolio concentrado."));
        }

        if items.len() >= 2 && items[1].value > 0.0 {
            let gap = (items[0].value - items[1].value) / items[1].value * 100.0;
            if gap > 50.0 {
                insights.push(format!("Brecha significativa ({gap:.0}%) entre #1 y #2. Lider claro del mercado."));
            }
        }
    }

    if !insights.is_empty() {
        for insight in insights.iter().take(4) {
            narratives.push(narrative(NarrativeKind::Insight, insight.clone()));
        }
        if let Some(&total_sales) = payload.kpis.get("total_sales") {
            if total_sales != 0.0 {
                if let Some(first_series) = payload.time_series.first() {
                    if let (Some(first), Some(last)) =
                        (first_series.points.first(), first_series.points.last())
                    {
                        let change = if first.value > 0.0 {
                            (last.value - first.value) / first.value * 100.0
                        } else {
                            0.0
                        };
                        let callout = if change < -5.0 {
                            "Recomendacion: Revisar estrategia de pricing y promociones para revertir tendencia."
                        } else if change > 15.0 {
                            "Recomendacion: Aprovechar momentum positivo con campanas de cross-selling."
                        } else {
                            "Recomendacion: Mantener estrategia actual y monitorear metricas clave."
                        };
                        narratives.push(narrative(NarrativeKind::Callout, callout));
                    }
                }
            }
        }
    }

    if narratives.is_empty() {
        narratives.push(narrative(
            NarrativeKind::Summary,
            "Datos procesados. Revisa las visualizaciones para detalles.",
        ));
    }

    narratives
}

fn generate_quick_conclusion(payload: &DataPayload) -> String {
    if let Some(&total_sales) = payload.kpis.get("total_sales") {
        if total_sales != 0.0 {
            let orders = payload.kpis.get("total_orders").copied().unwrap_or(0.0);
            return format!("Ventas totales: ${total_sales:.0} con {orders:.0} ordenes");
        }
    }
    if let Some(&interactions) = payload.kpis.get("total_interactions") {
        if interactions != 0.0 {
            return format!("El agente AI proceso {interactions:.0} interacciones");
        }
    }
    if let Some(&queries) = payload.kpis.get("total_queries") {
        if queries != 0.0 {
            return format!("Se registraron {queries:.0} consultas de preventa");
        }
    }
    "Datos procesados correctamente".to_string()
}

fn payload_summary(payload: &DataPayload) -> String {
    let mut parts = Vec::new();
    if !payload.kpis.is_empty() {
        let kv: Vec<String> = payload
            .kpis
            .iter()
            .map(|(k, v)| format!("{k}={v:.2}"))
            .collect();
        parts.push(format!("KPIs: {}", kv.join(", ")));
    }
    for ts in &payload.time_series {
        if let (Some(first), Some(last)) = (ts.points.first(), ts.points.last()) {
            let change = if first.value > 0.0 { (last.value - first.value) / first.value * 100.0 } else { 0.0 };
            parts.push(format!(
                "Serie {}: {} puntos ({} a {}), cambio {change:+.1}%",
                ts.series_name,
                ts.points.len(),
                first.date,
                last.date
            ));
        }
    }
    for top in &payload.top_items {
        let items_text: Vec<String> = top
            .items
            .iter()
            .take(3)
            .enumerate()
            .map(|(i, item)| format!("#{} '{}' (${:.0})", i + 1, item.title, item.value))
            .collect();
        parts.push(format!("Top {}: {}", top.ranking_name, items_text.join(", ")));
    }
    parts.join("\n")
}

/// Step 3: drop any KPI card or chart whose ref does not resolve against the
/// payload's `available_refs`. Ported from `validate_refs`.
fn validate_refs(mut spec: DashboardSpec, available_refs: &std::collections::HashSet<String>) -> DashboardSpec {
    spec.slots
        .series
        .retain(|kpi| available_refs.contains(&kpi.value_ref));

    spec.slots.charts.retain(|chart| match chart {
        SlotConfig::Chart(c) => {
            let base = c.dataset_ref.split('.').next().unwrap_or_default();
            available_refs
                .iter()
                .any(|r| r.starts_with(&format!("{base}.")) || r == &c.dataset_ref)
        }
        SlotConfig::Table(c) => {
            let base = c.dataset_ref.split('.').next().unwrap_or_default();
            available_refs
                .iter()
                .any(|r| r.starts_with(&format!("{base}.")) || r == &c.dataset_ref)
        }
        SlotConfig::Comparison(_) => true,
    });
    spec
}

/// Step 4: if fewer than 2 distinct chart kinds are present, backfill one
/// from whatever dataset is available. Ported from `_ensure_two_charts`.
fn ensure_two_charts(mut spec: DashboardSpec, payload: &DataPayload) -> DashboardSpec {
    let non_table_count = spec
        .slots
        .charts
        .iter()
        .filter(|c| !matches!(c, SlotConfig::Table(_)))
        .count();
    let has_line_or_area = spec.slots.charts.iter().any(|c| {
        matches!(
            c,
            SlotConfig::Chart(ChartConfig { kind: ChartKind::LineChart | ChartKind::AreaChart, .. })
        )
    });
    let has_bar = spec
        .slots
        .charts
        .iter()
        .any(|c| matches!(c, SlotConfig::Chart(ChartConfig { kind: ChartKind::BarChart, .. })));

    let distinct_kinds = [has_line_or_area, has_bar].iter().filter(|b| **b).count();
    if distinct_kinds >= 2 && non_table_count >= 2 {
        return spec;
    }

    if !has_line_or_area {
        if let Some(ts) = payload.time_series.first() {
            spec.slots.charts.insert(
                0,
                SlotConfig::Chart(ChartConfig {
                    kind: ChartKind::AreaChart,
                    title: format!("Tendencia: {}", format_title(&ts.series_name)),
                    dataset_ref: format!("ts.{}", ts.series_name),
                    x_axis: "date".to_string(),
                    y_axis: "value".to_string(),
                }),
            );
        }
    }

    if !has_bar {
        if let Some(top) = payload.top_items.first() {
            spec.slots.charts.push(SlotConfig::Chart(ChartConfig {
                kind: ChartKind::BarChart,
                title: format!("Ranking: {}", format_title(&top.ranking_name)),
                dataset_ref: format!("top.{}", top.ranking_name),
                x_axis: "title".to_string(),
                y_axis: "value".to_string(),
            }));
        }
    }

    spec
}

/// Entry point: build the deterministic spec, attach a narrative (LLM if
/// `use_llm` and the client accepts, heuristic otherwise), validate refs,
/// backfill a second chart, and set the final conclusion. Ported from
/// `PresentationAgent.run`.
pub async fn compose(
    question: &str,
    payload: &DataPayload,
    chat_context: &str,
    llm: &dyn LlmClient,
    use_llm: bool,
) -> DashboardSpec {
    let mut spec = build_spec_heuristic(question, payload);

    let (narrative_blocks, conclusion) = if use_llm {
        match llm
            .generate_narrative(question, chat_context, &payload_summary(payload))
            .await
        {
            Ok(result) => {
                let mut blocks = vec![narrative(NarrativeKind::Headline, result.conclusion.clone())];
                blocks.push(narrative(NarrativeKind::Summary, result.summary));
                for insight in result.insights {
                    blocks.push(narrative(NarrativeKind::Insight, insight));
                }
                blocks.push(narrative(NarrativeKind::Callout, result.recommendation));
                (blocks, result.conclusion)
            }
            Err(err) => {
                tracing::warn!(error = %err, "llm narrative failed, falling back to heuristic");
                let blocks = generate_smart_narrative(payload);
                (blocks, generate_quick_conclusion(payload))
            }
        }
    } else {
        let blocks = generate_smart_narrative(payload);
        (blocks, generate_quick_conclusion(payload))
    };

    spec.slots.narrative = narrative_blocks;
    spec = validate_refs(spec, &payload.available_refs);
    spec = ensure_two_charts(spec, payload);
    spec.conclusion = Some(conclusion);
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DemoLlmClient;
    use crate::model::{TimeSeriesData, TimeSeriesPoint, TopItem, TopItemsData};

    fn sales_payload() -> DataPayload {
        let mut payload = DataPayload::default();
        let mut kpis = std::collections::BTreeMap::new();
        kpis.insert("total_sales".to_string(), 1_000_000.0);
        kpis.insert("total_orders".to_string(), 500.0);
        kpis.insert("avg_order_value".to_string(), 2000.0);
        kpis.insert("total_units".to_string(), 900.0);
        payload.merge_kpi_row(kpis);
        payload.add_time_series(TimeSeriesData {
            series_name: "sales_by_day".to_string(),
            points: vec![
                TimeSeriesPoint { date: "2026-06-01".to_string(), value: 1000.0, label: None },
                TimeSeriesPoint { date: "2026-06-02".to_string(), value: 1300.0, label: None },
            ],
        });
        payload.add_top_items(TopItemsData {
            ranking_name: "products_by_revenue".to_string(),
            metric: "revenue".to_string(),
            items: vec![
                TopItem { rank: 1, id: "A".to_string(), title: "Producto A".to_string(), value: 500.0, extra: None },
                TopItem { rank: 2, id: "B".to_string(), title: "Producto B".to_string(), value: 300.0, extra: None },
                TopItem { rank: 3, id: "C".to_string(), title: "Producto C".to_string(), value: 100.0, extra: None },
            ],
        });
        payload
    }

    #[tokio::test]
    async fn composes_a_dashboard_with_kpis_and_two_chart_kinds() {
        let payload = sales_payload();
        let spec = compose("ventas de este mes", &payload, "", &DemoLlmClient, false).await;
        assert!(!spec.slots.series.is_empty());
        let has_line_or_area = spec.slots.charts.iter().any(|c| {
            matches!(c, SlotConfig::Chart(ChartConfig { kind: ChartKind::LineChart | ChartKind::AreaChart, .. }))
        });
        let has_bar = spec
            .slots
            .charts
            .iter()
            .any(|c| matches!(c, SlotConfig::Chart(ChartConfig { kind: ChartKind::BarChart, .. })));
        assert!(has_line_or_area && has_bar);
        assert!(spec.conclusion.is_some());
    }

    #[test]
    fn validate_refs_drops_kpis_with_unresolved_refs() {
        let mut spec = DashboardSpec::minimal("t", "c");
        spec.slots.series.push(KpiCardConfig {
            label: "Ventas".to_string(),
            value_ref: "kpi.total_sales".to_string(),
            format: KpiFormat::Currency,
            delta_ref: None,
            trend: None,
        });
        let refs: std::collections::HashSet<String> = ["kpi.other".to_string()].into_iter().collect();
        let spec = validate_refs(spec, &refs);
        assert!(spec.slots.series.is_empty());
    }

    #[test]
    fn title_falls_back_to_generic_dashboard_for_unrecognized_questions() {
        assert_eq!(generate_title("que tal el clima"), "Dashboard de Insights");
        assert_eq!(generate_title("ventas de ayer"), "Dashboard de Ventas");
    }

    #[tokio::test]
    async fn llm_narrative_failure_falls_back_to_heuristic() {
        let payload = sales_payload();
        let spec = compose("ventas", &payload, "", &DemoLlmClient, true).await;
        assert!(spec.conclusion.unwrap().contains("Ventas"));
    }
}
