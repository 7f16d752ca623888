//! Account CRUD and session lifecycle endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};
use wagate_core::{error::WagateError, phone, types::Account};
use wagate_whatsapp::generate_qr_image;

use super::{api_error, error_response, json_body, ApiError, ApiResult, ApiState};
use crate::sessions::PairingState;

#[derive(Debug, Deserialize)]
pub(super) struct CreateAccount {
    name: String,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateAccount {
    name: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct QrQuery {
    /// `png` returns the image itself instead of JSON.
    format: Option<String>,
}

/// Account JSON with the live `connected` flag.
fn account_json(account: &Account, connected: bool) -> ApiResult<Value> {
    let mut value = serde_json::to_value(account)
        .map_err(|e| api_error(WagateError::Serialization(e)))?;
    value["connected"] = json!(connected);
    Ok(value)
}

fn valid_name(name: &str) -> Result<&str, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "name must not be empty"));
    }
    Ok(name)
}

fn valid_phone(raw: Option<&str>) -> Result<Option<String>, ApiError> {
    raw.filter(|p| !p.trim().is_empty())
        .map(phone::normalize_phone)
        .transpose()
        .map_err(api_error)
}

/// QR payload plus its PNG rendering, base64 encoded.
fn qr_json(qr: &str) -> ApiResult<Value> {
    let png = generate_qr_image(qr).map_err(|e| {
        error!("QR image generation failed: {e}");
        api_error(e)
    })?;
    Ok(json!({
        "status": "qr_pending",
        "qr": qr,
        "qr_png_base64": BASE64.encode(png),
    }))
}

/// `GET /api/accounts`
pub(super) async fn list(State(state): State<ApiState>) -> ApiResult {
    let accounts = state.store.list_accounts().await.map_err(api_error)?;
    let mut out = Vec::with_capacity(accounts.len());
    for account in &accounts {
        let connected = state.sessions.is_connected(&account.id).await;
        out.push(account_json(account, connected)?);
    }
    Ok(Json(json!({ "accounts": out })))
}

/// `POST /api/accounts`
pub(super) async fn create(
    State(state): State<ApiState>,
    body: Result<Json<CreateAccount>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let req = json_body(body)?;
    let name = valid_name(&req.name)?;
    let phone = valid_phone(req.phone.as_deref())?;

    let account = state
        .store
        .create_account(name, phone.as_deref())
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(account_json(&account, false)?)))
}

/// `GET /api/accounts/{id}`
pub(super) async fn fetch(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let account = state.store.get_account(&id).await.map_err(api_error)?;
    let connected = state.sessions.is_connected(&id).await;
    Ok(Json(account_json(&account, connected)?))
}

/// `PUT /api/accounts/{id}`
pub(super) async fn update(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateAccount>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    let name = req.name.as_deref().map(valid_name).transpose()?;
    let phone = valid_phone(req.phone.as_deref())?;

    let account = state
        .store
        .update_account(&id, name, phone.as_deref())
        .await
        .map_err(api_error)?;
    let connected = state.sessions.is_connected(&id).await;
    Ok(Json(account_json(&account, connected)?))
}

/// `DELETE /api/accounts/{id}` — stops the session and wipes its credentials first.
pub(super) async fn remove(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    state.sessions.remove(&id).await.map_err(api_error)?;
    state.store.delete_account(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

/// Connect, then report either `connected` or the first QR code.
async fn connect_and_wait(state: &ApiState, id: &str) -> ApiResult<(StatusCode, Json<Value>)> {
    let timeout = Duration::from_secs(state.whatsapp.qr_timeout_secs);
    match state
        .sessions
        .wait_for_qr(id, timeout)
        .await
        .map_err(api_error)?
    {
        PairingState::Connected => Ok((StatusCode::OK, Json(json!({ "status": "connected" })))),
        PairingState::Qr(qr) => Ok((StatusCode::OK, Json(qr_json(&qr)?))),
        PairingState::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "connecting",
                "message": "session started, no QR code yet; poll the qr or status endpoint",
            })),
        )),
    }
}

/// `POST /api/accounts/{id}/connect`
pub(super) async fn connect(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.sessions.connect(&id).await.map_err(api_error)?;
    info!("connect requested for account {id}");
    connect_and_wait(&state, &id).await
}

/// `POST /api/accounts/{id}/disconnect`
pub(super) async fn disconnect(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult {
    state.sessions.disconnect(&id).await.map_err(api_error)?;
    info!("disconnect requested for account {id}");
    Ok(Json(json!({ "status": "disconnected" })))
}

/// `POST /api/accounts/{id}/reconnect`
pub(super) async fn reconnect(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.sessions.reconnect(&id).await.map_err(api_error)?;
    info!("reconnect requested for account {id}");
    connect_and_wait(&state, &id).await
}

/// `POST /api/accounts/{id}/reset` — forget the linked device and pair again.
pub(super) async fn reset(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.sessions.reset(&id).await.map_err(api_error)?;
    info!("reset requested for account {id}");
    connect_and_wait(&state, &id).await
}

/// `GET /api/accounts/{id}/qr` — latest QR as JSON, or as PNG with `?format=png`.
pub(super) async fn qr(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<QrQuery>,
) -> ApiResult<Response> {
    let Some(qr) = state.sessions.latest_qr(&id).await.map_err(api_error)? else {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            "no QR code available; connect the account first",
        ));
    };

    if query.format.as_deref() == Some("png") {
        let png = generate_qr_image(&qr).map_err(api_error)?;
        return Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response());
    }
    Ok(Json(qr_json(&qr)?).into_response())
}

/// `GET /api/accounts/{id}/status` — long-poll until the account is paired.
pub(super) async fn status(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let timeout = Duration::from_secs(state.whatsapp.pair_timeout_secs);
    let connected = state
        .sessions
        .wait_for_connected(&id, timeout)
        .await
        .map_err(api_error)?;

    let account = state.store.get_account(&id).await.map_err(api_error)?;
    Ok(Json(json!({
        "status": account.status,
        "connected": connected,
    })))
}
