//! Intent Router (SPEC_FULL.md §4.3). Deterministic keyword/regex classifier
//! with an LLM fallback only when no pattern or keyword matched at all.
//!
//! Grounded in `intent_router.py`'s `IntentRouter.route`: the step ordering
//! (conversational patterns, then ambiguity, then data/dashboard keywords,
//! then domain detection, then LLM fallback) is preserved exactly.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::llm::LlmClient;
use crate::model::{Clarification, Domain, RoutingDecision};

struct ConversationalPattern {
    regex: Lazy<Regex>,
    response_key: &'static str,
}

macro_rules! conversational_pattern {
    ($re:expr, $key:expr) => {
        ConversationalPattern {
            regex: Lazy::new(|| Regex::new($re).unwrap()),
            response_key: $key,
        }
    };
}

static CONVERSATIONAL_PATTERNS: [ConversationalPattern; 4] = [
    conversational_pattern!(
        r"^(hola|hey|buenas|buenos dias|buenas tardes|buenas noches|saludos)",
        "greeting"
    ),
    conversational_pattern!(
        r"^(gracias|muchas gracias|thanks|ok|perfecto|genial|excelente)",
        "thanks"
    ),
    conversational_pattern!(
        r"(que puedes hacer|que sabes hacer|ayuda|help|como funciona)",
        "help"
    ),
    conversational_pattern!(r"(quien eres|que eres|como te llamas)", "identity"),
];

fn direct_response(key: &str) -> &'static str {
    match key {
        "greeting" => {
            "Hola! Soy SQL Agent, tu asistente de datos. Puedo ayudarte con:\n\
             - Ventas y ordenes\n- Inventario y productos\n- Rendimiento del agente AI\n\
             - Casos escalados\n\nQue te gustaria saber?"
        }
        "thanks" => "De nada! Si tienes mas preguntas sobre tus datos, estoy aqui para ayudarte.",
        "help" => {
            "Puedo ayudarte a analizar tus datos de negocio. Prueba preguntas como:\n\
             - Como van las ventas?\n- Mostrame el inventario\n- Productos con stock bajo\n\
             - Como esta el agente AI?\n- Ultimas ordenes"
        }
        "identity" => {
            "Soy SQL Agent, un asistente de BI potenciado por IA. Analizo tus datos de ventas, \
             inventario y servicio al cliente para darte insights accionables."
        }
        _ => "No estoy seguro de que necesitas. Que area te interesa?",
    }
}

static AMBIGUITY_PRONOUN_WITHOUT_CONTEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(eso|esto|aquello|ese|este|aquel)\b").unwrap());
static AMBIGUITY_SHORT_PRONOUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(lo|la|los|las|le|les)\s+\w+$").unwrap());
static AMBIGUITY_TOO_SHORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(cuanto|cuantos|cuantas|que|como)\s*\??$").unwrap());
static AMBIGUITY_SHOW_WITHOUT_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(mostrame|muestrame|dame|dime)\s*\??$").unwrap());
static AMBIGUITY_COMPARE_WITHOUT_SUBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(comparar?|versus|vs)\s*$").unwrap());

const DATA_KEYWORDS: &[&str] = &[
    "cuanto", "cuantos", "cuantas", "total", "suma", "cantidad", "vendimos", "ventas", "venta",
    "vendido", "ventesa", "vetas", "ordenes", "orden", "pedidos", "pedido", "productos",
    "producto", "inventario", "stock", "escalados", "escalaciones", "casos", "agente", "ai",
    "bot", "interacciones", "preventa", "preguntas", "ingresos", "revenue", "facturacion",
    "promedio", "media", "kpi", "metricas", "enero", "febrero", "marzo", "abril", "mayo",
    "junio", "julio", "agosto", "septiembre", "octubre", "noviembre", "diciembre", "mes",
    "semana", "dia", "año", "trimestre", "periodo", "dime", "dame", "decime", "quiero",
    "necesito", "busco",
];

const DASHBOARD_KEYWORDS: &[&str] = &[
    "mostrame", "muestrame", "muestra", "ver", "visualiza", "grafico", "graficos", "gráfico",
    "gráficos", "chart", "charts", "dashboard", "panel", "reporte", "tendencia", "tendencias",
    "evolucion", "evolución", "comparar", "comparacion", "comparación", "versus", "vs",
    "analisis", "análisis", "analiza", "analizar", "pareto", "insight", "insights", "resumen",
    "ticket", "reposicion", "reposición", "reponer", "necesitar", "recomendar", "bajo stock",
    "alta rotacion", "rotacion", "rotación", "quebrar", "quiebre", "agotar", "agotarse",
    "agotando", "faltante", "critico", "criticos", "crítico", "críticos", "alertas", "alerta",
    "proyeccion", "proyectar", "estimar", "predecir", "margen", "ganancia", "beneficio", "cyber",
    "cybermonday", "black friday", "hot sale", "crecimiento", "ciclo", "temporada", "como van",
    "como estan", "como esta", "que tal", "como vamos", "como fue", "como fueron", "como estuvo",
    "como me fue", "resume", "resumir", "resumime", "situacion", "estado de", "status",
    "ultimos", "ultimas", "recientes", "hoy", "ayer", "actualmente", "actual", "este mes",
    "esta semana", "este año", "cual fue", "cuál fue", "cual es", "cuál es", "mas vendido",
    "más vendido", "menos vendido", "mejor mes", "peor mes", "mejor dia", "peor dia",
    "que mes", "qué mes", "en que mes", "en qué mes", "que producto", "qué producto", "cuales",
    "cuáles", "aumentar stock", "aumentar inventario", "ponderar", "debo hacer", "deberia",
    "debería", "recomienda", "sugieres",
];

const DOMAIN_KEYWORDS: &[(Domain, &[&str])] = &[
    (
        Domain::Sales,
        &["venta", "vendido", "orden", "pedido", "factura", "ingreso", "revenue"],
    ),
    (
        Domain::Inventory,
        &["producto", "inventario", "stock", "disponible"],
    ),
    (
        Domain::Conversations,
        &["agente", "ai", "bot", "interaccion", "conversacion", "mensaje"],
    ),
    (
        Domain::Escalations,
        &["escalado", "escalacion", "caso", "soporte", "ticket"],
    ),
    (Domain::Presale, &["preventa", "pregunta", "consulta"]),
];

const TIME_REF_KEYWORDS: &[&str] = &[
    "mes", "semana", "dia", "año", "ayer", "hoy", "enero", "febrero", "marzo", "abril", "mayo",
    "junio", "julio", "agosto", "septiembre", "octubre", "noviembre", "diciembre",
];

fn detect_domain(q_lower: &str) -> Domain {
    domain_scores(q_lower)
        .into_iter()
        .max_by_key(|(_, score)| *score)
        .map(|(domain, _)| domain)
        .unwrap_or(Domain::Sales)
}

fn domain_scores(q_lower: &str) -> Vec<(Domain, usize)> {
    DOMAIN_KEYWORDS
        .iter()
        .filter_map(|(domain, keywords)| {
            let score = keywords.iter().filter(|kw| q_lower.contains(*kw)).count();
            (score > 0).then_some((*domain, score))
        })
        .collect()
}

enum Ambiguity {
    PronounWithoutContext,
    TooShort,
    ShowWithoutObject,
    CompareWithoutSubject,
    MultiDomain,
    ComparisonWithoutPeriod,
}

fn detect_ambiguity(q_lower: &str) -> Option<Ambiguity> {
    if AMBIGUITY_PRONOUN_WITHOUT_CONTEXT.is_match(q_lower) {
        return Some(Ambiguity::PronounWithoutContext);
    }
    if AMBIGUITY_SHORT_PRONOUN.is_match(q_lower) {
        return Some(Ambiguity::PronounWithoutContext);
    }
    if AMBIGUITY_TOO_SHORT.is_match(q_lower) {
        return Some(Ambiguity::TooShort);
    }
    if AMBIGUITY_SHOW_WITHOUT_OBJECT.is_match(q_lower) {
        return Some(Ambiguity::ShowWithoutObject);
    }
    if AMBIGUITY_COMPARE_WITHOUT_SUBJECT.is_match(q_lower) {
        return Some(Ambiguity::CompareWithoutSubject);
    }

    let words: Vec<&str> = q_lower.split_whitespace().collect();
    if words.len() < 3 {
        let has_clear_keyword = DATA_KEYWORDS
            .iter()
            .chain(DASHBOARD_KEYWORDS)
            .any(|kw| q_lower.contains(kw));
        if !has_clear_keyword {
            return Some(Ambiguity::TooShort);
        }
    }

    let scores = domain_scores(q_lower);
    if scores.len() >= 2 {
        let mut values: Vec<usize> = scores.iter().map(|(_, s)| *s).collect();
        values.sort_unstable_by(|a, b| b.cmp(a));
        if values[0] == values[1] {
            return Some(Ambiguity::MultiDomain);
        }
    }

    if ["comparar", "comparacion", "versus", "vs"]
        .iter()
        .any(|kw| q_lower.contains(kw))
    {
        let has_time_ref = TIME_REF_KEYWORDS.iter().any(|kw| q_lower.contains(kw));
        if !has_time_ref {
            return Some(Ambiguity::ComparisonWithoutPeriod);
        }
    }

    None
}

fn clarification_for(q_lower: &str, ambiguity: Ambiguity) -> Clarification {
    match ambiguity {
        Ambiguity::PronounWithoutContext => Clarification {
            question: "No tengo contexto previo. Que datos te gustaria ver?".to_string(),
            options: vec![
                "Ventas del mes actual".to_string(),
                "Estado del inventario".to_string(),
                "Rendimiento del agente AI".to_string(),
                "Ordenes recientes".to_string(),
            ],
            understood_context:
                "Detecte una referencia a algo previo, pero no tengo ese contexto.".to_string(),
        },
        Ambiguity::TooShort => match detect_partial_domain(q_lower) {
            Some(Domain::Sales) => Clarification {
                question: "Sobre ventas, que te gustaria saber?".to_string(),
                options: vec![
                    "Total de ventas del mes".to_string(),
                    "Productos mas vendidos".to_string(),
                    "Tendencia de ventas".to_string(),
                    "Comparar con mes anterior".to_string(),
                ],
                understood_context: "Parece que preguntas sobre ventas.".to_string(),
            },
            Some(Domain::Inventory) => Clarification {
                question: "Sobre inventario, que te gustaria saber?".to_string(),
                options: vec![
                    "Productos con stock bajo".to_string(),
                    "Resumen de inventario".to_string(),
                    "Productos que necesitan reposicion".to_string(),
                    "Alertas de stock".to_string(),
                ],
                understood_context: "Parece que preguntas sobre inventario.".to_string(),
            },
            _ => Clarification {
                question: "Tu pregunta es muy breve. Sobre que area te gustaria saber?"
                    .to_string(),
                options: vec![
                    "Ventas y ordenes".to_string(),
                    "Inventario y stock".to_string(),
                    "Agente AI e interacciones".to_string(),
                    "Casos escalados".to_string(),
                ],
                understood_context: "No pude identificar claramente el tema.".to_string(),
            },
        },
        Ambiguity::ShowWithoutObject => Clarification {
            question: "Que te gustaria que te muestre?".to_string(),
            options: vec![
                "Dashboard de ventas".to_string(),
                "Estado del inventario".to_string(),
                "Métricas del agente AI".to_string(),
                "Órdenes recientes".to_string(),
            ],
            understood_context: "Quieres ver algo, pero no especificaste que.".to_string(),
        },
        Ambiguity::CompareWithoutSubject => Clarification {
            question: "Que te gustaria comparar y en que periodo?".to_string(),
            options: vec![
                "Ventas: este mes vs anterior".to_string(),
                "Inventario: actual vs hace 30 dias".to_string(),
                "Rendimiento AI: esta semana vs anterior".to_string(),
            ],
            understood_context: "Quieres hacer una comparacion.".to_string(),
        },
        Ambiguity::MultiDomain => {
            let labels: Vec<&str> = domain_scores(q_lower)
                .iter()
                .map(|(d, _)| domain_label(*d))
                .collect();
            Clarification {
                question: format!(
                    "Mencionas varios temas ({}). En cual te enfoco?",
                    labels.join(", ")
                ),
                options: labels.iter().map(|l| capitalize(l)).collect(),
                understood_context: format!("Detecte multiples temas: {}.", labels.join(", ")),
            }
        }
        Ambiguity::ComparisonWithoutPeriod => Clarification {
            question: "Que periodos quieres comparar?".to_string(),
            options: vec![
                "Este mes vs mes anterior".to_string(),
                "Esta semana vs semana anterior".to_string(),
                "Ultimos 7 dias vs 7 dias previos".to_string(),
                "Este año vs año anterior".to_string(),
            ],
            understood_context: "Quieres comparar, pero no especificaste los periodos."
                .to_string(),
        },
    }
}

fn detect_partial_domain(q_lower: &str) -> Option<Domain> {
    if q_lower.len() <= 2 {
        return None;
    }
    domain_scores(q_lower)
        .into_iter()
        .max_by_key(|(_, score)| *score)
        .map(|(domain, _)| domain)
}

fn domain_label(domain: Domain) -> &'static str {
    match domain {
        Domain::Sales => "ventas",
        Domain::Inventory => "inventario",
        Domain::Conversations => "interacciones AI",
        Domain::Escalations => "casos escalados",
        Domain::Presale => "preventa",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Deterministic steps 1-4 of the Router (SPEC_FULL.md §4.3). Returns `None`
/// when neither a pattern nor a keyword matched, signalling the caller to
/// fall through to the LLM.
pub fn route_heuristic(question: &str) -> Option<RoutingDecision> {
    let q_lower = question.to_lowercase();
    let q_lower = q_lower.trim();

    for pattern in &CONVERSATIONAL_PATTERNS {
        if pattern.regex.is_match(q_lower) {
            return Some(RoutingDecision::conversational(
                direct_response(pattern.response_key),
                format!("Matched conversational pattern: {}", pattern.response_key),
            ));
        }
    }

    if let Some(ambiguity) = detect_ambiguity(q_lower) {
        let clarification = clarification_for(q_lower, ambiguity);
        return Some(RoutingDecision::clarification(
            clarification,
            "Ambiguous query",
        ));
    }

    let mut needs_data = DATA_KEYWORDS.iter().any(|kw| q_lower.contains(kw));
    let needs_dashboard = DASHBOARD_KEYWORDS.iter().any(|kw| q_lower.contains(kw));
    if needs_dashboard {
        needs_data = true;
    }

    if !needs_data && !needs_dashboard {
        return None;
    }

    let domain = detect_domain(q_lower);
    if needs_dashboard {
        Some(RoutingDecision::dashboard(
            domain,
            0.9,
            format!("Dashboard requested for domain: {}", domain.as_str()),
        ))
    } else {
        Some(RoutingDecision::data_only(
            domain,
            0.85,
            format!("Data query for domain: {}", domain.as_str()),
        ))
    }
}

/// Full Router entry point: heuristic first, LLM fallback on a total miss.
/// Any adapter failure collapses to the dashboard/sales/0.5 default rather
/// than propagating, per SPEC_FULL.md §4.3 step 5.
pub async fn route(question: &str, llm: &dyn LlmClient) -> RoutingDecision {
    if let Some(decision) = route_heuristic(question) {
        return decision;
    }

    match llm.classify_intent(question).await {
        Ok(result) => routing_decision_from_llm(result),
        Err(err) => {
            tracing::warn!(error = %err, "router llm fallback failed, defaulting to dashboard/sales");
            RoutingDecision::dashboard(Domain::Sales, 0.5, "LLM error fallback")
        }
    }
}

fn routing_decision_from_llm(result: crate::llm::LlmRoutingResult) -> RoutingDecision {
    let domain = result
        .domain
        .as_deref()
        .and_then(domain_from_str)
        .unwrap_or(Domain::Sales);
    let confidence = result.confidence.unwrap_or(0.8);
    match result.response_type.as_str() {
        "conversational" => {
            RoutingDecision::conversational(direct_response("help"), result.reasoning)
        }
        "data_only" => RoutingDecision::data_only(domain, confidence, result.reasoning),
        _ => RoutingDecision::dashboard(domain, confidence, result.reasoning),
    }
}

fn domain_from_str(s: &str) -> Option<Domain> {
    match s {
        "sales" => Some(Domain::Sales),
        "inventory" => Some(Domain::Inventory),
        "conversations" => Some(Domain::Conversations),
        "escalations" => Some(Domain::Escalations),
        "presale" => Some(Domain::Presale),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResponseType;

    #[test]
    fn greets_conversationally() {
        let decision = route_heuristic("hola, que tal").unwrap();
        assert_eq!(decision.response_type, ResponseType::Conversational);
    }

    #[test]
    fn bare_mostrame_asks_for_clarification_with_pinned_options() {
        let decision = route_heuristic("mostrame").unwrap();
        assert_eq!(decision.response_type, ResponseType::Clarification);
        let options = decision.clarification.unwrap().options;
        assert_eq!(
            options,
            vec![
                "Dashboard de ventas",
                "Estado del inventario",
                "Métricas del agente AI",
                "Órdenes recientes",
            ]
        );
    }

    #[test]
    fn dashboard_keyword_routes_to_dashboard_with_domain() {
        let decision = route_heuristic("mostrame el dashboard de ventas de este mes").unwrap();
        assert_eq!(decision.response_type, ResponseType::Dashboard);
        assert_eq!(decision.domain, Some(Domain::Sales));
    }

    #[test]
    fn data_keyword_without_dashboard_keyword_is_data_only() {
        let decision = route_heuristic("cuantos productos tenemos en stock").unwrap();
        assert_eq!(decision.response_type, ResponseType::DataOnly);
        assert_eq!(decision.domain, Some(Domain::Inventory));
    }

    #[test]
    fn no_keyword_match_falls_through_to_llm() {
        assert!(route_heuristic("xyzxyz").is_none());
    }

    #[test]
    fn comparison_without_time_reference_is_ambiguous() {
        let decision = route_heuristic("quiero comparar ventas versus inventario").unwrap();
        assert_eq!(decision.response_type, ResponseType::Clarification);
    }
}
