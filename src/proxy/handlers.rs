//! HTTP request handlers.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Extension, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;

use super::gateway::{self, StreamContext};
use super::server::{AppState, RequestId};
use super::types::GatewayRequest;
use crate::error::Error;

/// Content type of the chat stream.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Tells nginx-style proxies not to buffer the stream.
const ACCEL_BUFFERING_HEADER: &str = "x-accel-buffering";

/// Handle POST /api/chat
///
/// Everything that can fail before the upstream is open is returned as a
/// JSON error with a non-200 status. After that the response is committed
/// and failures arrive as a terminal `{"error": ...}` frame.
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<GatewayRequest>, JsonRejection>,
) -> Result<Response, Error> {
    let Json(request) = payload.map_err(|e| Error::BadRequest(e.body_text()))?;
    request.validate()?;

    let request_id = request_id.0.to_string();
    tracing::info!(
        request_id = %request_id,
        provider = %request.provider,
        model = %request.model,
        messages = request.messages.len(),
        "Chat request"
    );

    let adapter = state.registry.get(&request.provider).map_err(|e| {
        tracing::warn!(request_id = %request_id, provider = %request.provider, "Unknown provider");
        e
    })?;

    let permit = state
        .stream_slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| Error::Internal("stream limiter closed".to_string()))?;

    let messages = request.upstream_messages();
    let config = request.generation_config();
    let upstream = adapter.stream_chat(&messages, &config).await?;

    let frames = gateway::spawn(
        upstream,
        state.timings,
        StreamContext {
            request_id,
            provider: request.provider,
            model: request.model,
            permit: Some(permit),
        },
    );
    let body = Body::from_stream(ReceiverStream::new(frames).map(Ok::<_, Infallible>));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static(ACCEL_BUFFERING_HEADER),
                HeaderValue::from_static("no"),
            ),
        ],
        body,
    )
        .into_response())
}

/// Handle GET /api/models - model catalogs keyed by provider name
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let catalogs: serde_json::Map<String, serde_json::Value> = state
        .registry
        .list()
        .iter()
        .map(|adapter| {
            (
                adapter.name().to_string(),
                serde_json::json!(adapter.available_models()),
            )
        })
        .collect();

    Json(serde_json::Value::Object(catalogs))
}

/// Handle GET /providers - kinds, models and credential health
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<serde_json::Value> = state
        .registry
        .list()
        .iter()
        .map(|adapter| {
            let models: Vec<&str> = adapter.available_models().iter().map(|m| m.id).collect();
            serde_json::json!({
                "name": adapter.name(),
                "kind": adapter.kind(),
                "models": models,
                "credentials": adapter.credential_status(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "providers": providers
    }))
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "providers": state.registry.len(),
    }))
}
