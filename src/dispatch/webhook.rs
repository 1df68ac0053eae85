use super::Dispatcher;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

const MAX_BODY_BYTES: usize = 1024 * 1024; // 1 MiB

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Optional shared token the gateway sends in the `apikey` header.
    pub webhook_token: Option<String>,
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok_json(status: &str) -> ApiResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": status })))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/webhook", post(handle_webhook))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

async fn handle_health() -> ApiResponse {
    ok_json("ok")
}

/// Webhook sink for the gateway. Always acknowledges 200 -- an error
/// response here would only provoke a retry storm from the upstream; a
/// dropped event is logged, never surfaced.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResponse {
    if let Some(ref token) = state.webhook_token {
        let presented = headers.get("apikey").and_then(|v| v.to_str().ok());
        if presented != Some(token.as_str()) {
            tracing::warn!("webhook delivery with missing or wrong token, ignoring");
            return ok_json("ignored");
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable webhook body, ignoring");
            return ok_json("ignored");
        }
    };

    let Some(event) = Dispatcher::normalize(&payload) else {
        return ok_json("ignored");
    };

    // Handle off the request path so a slow flow run never delays the
    // acknowledgement to the gateway.
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.handle_event(event).await {
            tracing::warn!(error = %e, "inbound dispatch failed");
        }
    });

    ok_json("received")
}
