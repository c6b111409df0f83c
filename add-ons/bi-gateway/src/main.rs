//! Gateway entrypoint (SPEC_FULL.md §6): wires `Config::from_env`, the
//! demo or real collaborators per `DEMO_MODE`/the `postgres` feature, and
//! the six HTTP surfaces onto one axum `Router`.

mod handlers;
mod sse;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use bi_core::{
    Config, DemoDatabase, DemoLlmClient, InMemoryConversationStore, LlmClient, Orchestrator,
    OpenRouterLlmClient,
};

#[cfg(feature = "postgres")]
use bi_core::PostgresDatabase;

use handlers::{cache, chat, health, insights, queries};
use state::AppState;

fn build_app(state: AppState) -> Router {
    let frontend_url = state.config.frontend_url.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &axum::http::HeaderValue, _: &axum::http::request::Parts| {
            let s = origin.to_str().unwrap_or("");
            if s == "http://localhost:3000"
                || s == "http://localhost:3001"
                || s == "http://localhost:3002"
                || s == "http://localhost:3003"
            {
                return true;
            }
            if s.ends_with(".vercel.app") && s.starts_with("https://") {
                return true;
            }
            match &frontend_url {
                Some(url) if url == "*" => true,
                Some(url) => s == url,
                None => false,
            }
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .expose_headers(tower_http::cors::Any);

    Router::new()
        .route("/chat/stream", post(chat::chat_stream))
        .route("/insights/run", post(insights::insights_run))
        .route("/insights/stream", post(insights::insights_stream))
        .route("/queries", get(queries::list_queries))
        .route("/health", get(health::health))
        .route("/cache/invalidate", post(cache::invalidate_cache))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[bi-gateway] .env not loaded: {e} (using system environment)");
    }

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_directive.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.demo_mode {
        tracing::info!("bi-gateway starting in demo mode (no external database or LLM calls)");
    }

    let llm: Arc<dyn LlmClient> = if config.demo_mode {
        Arc::new(DemoLlmClient)
    } else {
        match OpenRouterLlmClient::from_config(&config) {
            Some(client) => Arc::new(client),
            None => {
                tracing::warn!("DEMO_MODE=false but no LLM_API_KEY set, falling back to demo LLM client");
                Arc::new(DemoLlmClient)
            }
        }
    };

    #[cfg(feature = "postgres")]
    let db: Arc<dyn bi_core::Database> = if !config.demo_mode {
        match &config.db_url {
            Some(url) => match PostgresDatabase::connect(url).await {
                Ok(db) => Arc::new(db),
                Err(e) => {
                    tracing::error!("failed to connect to database: {e}, falling back to demo data");
                    Arc::new(DemoDatabase)
                }
            },
            None => {
                tracing::warn!("DEMO_MODE=false but no DATABASE_URL set, falling back to demo data");
                Arc::new(DemoDatabase)
            }
        }
    } else {
        Arc::new(DemoDatabase)
    };

    #[cfg(not(feature = "postgres"))]
    let db: Arc<dyn bi_core::Database> = Arc::new(DemoDatabase);

    let conversations = Arc::new(InMemoryConversationStore::default());

    let host = config.host.clone();
    let port = config.port;
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), llm, db, conversations));
    let state = AppState {
        orchestrator,
        config: Arc::new(config),
    };

    let app = build_app(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));
    tracing::info!("bi-gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
}
