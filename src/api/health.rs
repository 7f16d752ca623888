use axum::{extract::State, response::Json};
use serde_json::json;

use super::{api_error, ApiResult, ApiState};

/// `GET /api/health` — uptime plus account and live-session counts.
pub(super) async fn health(State(state): State<ApiState>) -> ApiResult {
    let accounts = state.store.list_accounts().await.map_err(api_error)?;
    let connected = state.sessions.connected_count().await;

    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "accounts": accounts.len(),
        "connected": connected,
    })))
}
