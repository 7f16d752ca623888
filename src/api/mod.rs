//! HTTP API server.
//!
//! JSON endpoints for sending messages, managing templates, contacts and
//! accounts, and driving QR pairing. Every route sits behind the optional
//! bearer token.

mod accounts;
mod contacts;
mod health;
mod messages;
mod templates;
mod upload;

#[cfg(test)]
mod tests;

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use wagate_core::{
    config::{Config, UploadConfig, WhatsAppConfig},
    error::WagateError,
};
use wagate_store::Store;

use crate::dispatch::Dispatcher;
use crate::sessions::SessionManager;

/// Error half of every handler result.
pub(crate) type ApiError = (StatusCode, Json<Value>);
pub(crate) type ApiResult<T = Json<Value>> = Result<T, ApiError>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    store: Store,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    api_key: Option<String>,
    uptime: Instant,
    whatsapp: WhatsAppConfig,
    uploads: UploadConfig,
}

impl ApiState {
    pub fn new(
        config: &Config,
        store: Store,
        sessions: Arc<SessionManager>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let api_key = if config.api.api_key.is_empty() {
            None
        } else {
            Some(config.api.api_key.clone())
        };

        Self {
            store,
            sessions,
            dispatcher,
            api_key,
            uptime: Instant::now(),
            whatsapp: config.whatsapp.clone(),
            uploads: config.uploads.clone(),
        }
    }
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({"error": message.into()})))
}

/// Map a domain error onto an HTTP status.
pub(crate) fn api_error(e: WagateError) -> ApiError {
    let status = match &e {
        WagateError::Validation(_) => StatusCode::BAD_REQUEST,
        WagateError::NotFound(_) => StatusCode::NOT_FOUND,
        WagateError::Conflict(_) => StatusCode::CONFLICT,
        WagateError::Session(_) => StatusCode::BAD_GATEWAY,
        WagateError::Config(_)
        | WagateError::Store(_)
        | WagateError::Io(_)
        | WagateError::Serialization(_) => {
            error!("internal error: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, e.to_string())
}

/// Unwrap a JSON body, turning a rejection into a 400.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(v)| v)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid request: {e}")))
}

/// Constant-time string comparison to prevent timing attacks on API token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check bearer token auth. Returns `None` if authorized, `Some(response)` if rejected.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Option<ApiError> {
    let key = api_key.as_ref()?;

    let Some(header) = headers.get("authorization") else {
        return Some(error_response(
            StatusCode::UNAUTHORIZED,
            "missing Authorization header",
        ));
    };

    let Ok(value) = header.to_str() else {
        return Some(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid Authorization header",
        ));
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => None,
        _ => Some(error_response(StatusCode::UNAUTHORIZED, "invalid token")),
    }
}

async fn require_auth(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    match check_auth(request.headers(), &state.api_key) {
        Some(rejection) => rejection.into_response(),
        None => next.run(request).await,
    }
}

/// Build the axum router with shared state.
pub fn build_router(state: ApiState, max_body_bytes: usize) -> Router {
    let routes = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/messages", get(messages::list))
        .route("/api/messages/send", post(messages::send))
        .route("/api/messages/send-media", post(messages::send_media))
        .route("/api/messages/bulk", post(messages::bulk))
        .route("/api/templates", get(templates::list).post(templates::create))
        .route(
            "/api/templates/{id}",
            get(templates::fetch)
                .put(templates::update)
                .delete(templates::remove),
        )
        .route("/api/templates/{id}/preview", post(templates::preview))
        .route("/api/contacts", get(contacts::list).post(contacts::create))
        .route(
            "/api/contacts/{id}",
            get(contacts::fetch)
                .put(contacts::update)
                .delete(contacts::remove),
        )
        .route("/api/accounts", get(accounts::list).post(accounts::create))
        .route(
            "/api/accounts/{id}",
            get(accounts::fetch)
                .put(accounts::update)
                .delete(accounts::remove),
        )
        .route("/api/accounts/{id}/connect", post(accounts::connect))
        .route("/api/accounts/{id}/disconnect", post(accounts::disconnect))
        .route("/api/accounts/{id}/reconnect", post(accounts::reconnect))
        .route("/api/accounts/{id}/reset", post(accounts::reset))
        .route("/api/accounts/{id}/qr", get(accounts::qr))
        .route("/api/accounts/{id}/status", get(accounts::status));

    routes
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(axum::extract::DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Start the API server and run until ctrl-c.
pub async fn serve(config: &Config, state: ApiState) -> Result<(), WagateError> {
    if state.api_key.is_none() {
        tracing::warn!("api_key is empty: the API accepts unauthenticated requests");
    }

    let app = build_router(state, config.api.max_body_mb * 1024 * 1024);
    let addr = format!("{}:{}", config.api.host, config.api.port);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!("API server failed to bind to {addr}: {e}");
        WagateError::Io(e)
    })?;

    info!("API server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
            }
            info!("shutdown requested");
        })
        .await
        .map_err(WagateError::Io)
}
