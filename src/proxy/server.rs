//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::gateway::StreamTimings;
use super::handlers;
use crate::config::Config;
use crate::providers::ProviderRegistry;

/// Response header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id assigned to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub timings: StreamTimings,
    /// Caps concurrently open streams; a permit lives as long as the stream task.
    pub stream_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(registry: ProviderRegistry, config: &Config) -> Self {
        Self {
            registry: Arc::new(registry),
            timings: StreamTimings::from_config(&config.gateway),
            stream_slots: Arc::new(Semaphore::new(config.gateway.max_concurrent_streams)),
        }
    }
}

/// Tag the request with a fresh [`RequestId`] and echo it on the response.
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.0.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/models", get(handlers::list_models))
        .route("/providers", get(handlers::list_providers))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(assign_request_id)),
        )
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    // No overall request timeout: streams are bounded by the gateway watchdog.
    let http_client = Client::builder()
        .connect_timeout(config.gateway.connect_timeout())
        .build()?;

    let registry = ProviderRegistry::from_config(&config, http_client);
    if registry.is_empty() {
        tracing::warn!("No usable providers - every chat request will be rejected");
    }

    let app = create_router(AppState::new(registry, &config));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(
        address = %listen_addr,
        heartbeat_secs = config.gateway.heartbeat_interval_secs,
        inactivity_timeout_secs = config.gateway.inactivity_timeout_secs,
        "Starting chatgate server"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
