//! HTTP API gateway for Kindred.
//!
//! Exposes the chat turn pipeline over HTTP:
//! - `POST /chat`: SSE stream of reply chunks
//! - `POST /session`, `POST /session/end`: explicit session control
//! - `GET /health`
//!
//! Built on Axum. Everything heavy (store, provider, persona registry) is
//! built once at startup and shared through [`GatewayState`].

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use kindred_companion::ChatPipeline;
use kindred_config::AppConfig;
use kindred_core::provider::Provider;
use kindred_core::storage::Storage;
use kindred_persona::PersonaRegistry;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Request bodies above this size are rejected.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub pipeline: Arc<ChatPipeline>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Assemble state from already-built collaborators. Must run inside a
    /// Tokio runtime (the pipeline spawns its background writer).
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Storage>,
        provider: Arc<dyn Provider>,
        registry: Arc<PersonaRegistry>,
    ) -> Self {
        let pipeline = Arc::new(ChatPipeline::new(&config, store, provider, registry));
        Self { config, pipeline }
    }

    /// Build store, provider and persona registry from configuration.
    pub async fn from_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = kindred_store::open(&config.storage).await?;

        let providers = kindred_providers::build_from_config(&config);
        if providers.default().is_none() {
            warn!(
                provider = %config.default_provider,
                "Default provider is not configured; every turn will be served a fallback line"
            );
        }
        let provider = providers.default_or_unconfigured();

        let registry = Arc::new(PersonaRegistry::load(
            config.persona.catalog_path.as_deref(),
            &config.persona.default_persona,
        )?);

        info!(
            store = store.name(),
            provider = provider.name(),
            personas = registry.len(),
            "Gateway state ready"
        );

        Ok(Self::new(config, store, provider, registry))
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.gateway.allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .merge(api::routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// CORS for the configured origins. With none configured, only same-origin
/// requests work.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(api::USER_ID_HEADER)])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(config).await?);
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
