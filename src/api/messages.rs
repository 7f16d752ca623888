//! Sending endpoints and the message log.

use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::info;

use super::{api_error, error_response, json_body, upload, ApiError, ApiResult, ApiState};
use crate::dispatch::Content;

#[derive(Debug, Deserialize)]
pub(super) struct SendRequest {
    account_id: String,
    to: String,
    message: Option<String>,
    template_id: Option<String>,
    #[serde(default)]
    variables: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BulkRequest {
    account_id: String,
    #[serde(default)]
    recipients: Vec<String>,
    /// Contacts whose phone numbers are added to `recipients`.
    #[serde(default)]
    contact_ids: Vec<String>,
    message: Option<String>,
    template_id: Option<String>,
    #[serde(default)]
    variables: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct LogQuery {
    account_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn require_account(account_id: &str) -> Result<(), ApiError> {
    if account_id.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "account_id is required"));
    }
    Ok(())
}

/// `POST /api/messages/send`
pub(super) async fn send(
    State(state): State<ApiState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    require_account(&req.account_id)?;

    let content = Content::resolve(&state.store, req.message, req.template_id)
        .await
        .map_err(api_error)?;
    let receipt = state
        .dispatcher
        .send_one(&req.account_id, &req.to, &content, &req.variables)
        .await
        .map_err(api_error)?;

    Ok(Json(json!({
        "status": "sent",
        "recipient": receipt.recipient,
        "message_id": receipt.message_id,
    })))
}

/// `POST /api/messages/send-media` — multipart form with a `file` part.
pub(super) async fn send_media(
    State(state): State<ApiState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult {
    let multipart = multipart
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid request: {e}")))?;
    let form = upload::read_media_form(multipart, &state.uploads).await?;

    info!(
        "media upload for account {}: {} ({} bytes, {})",
        form.account_id,
        form.media.file_name,
        form.media.data.len(),
        form.media.mime_type
    );

    let receipt = state
        .dispatcher
        .send_media(&form.account_id, &form.to, &form.media)
        .await
        .map_err(api_error)?;

    Ok(Json(json!({
        "status": "sent",
        "recipient": receipt.recipient,
        "message_id": receipt.message_id,
        "kind": form.media.kind,
        "mime_type": form.media.mime_type,
    })))
}

/// `POST /api/messages/bulk` — sequential send with a per-recipient report.
pub(super) async fn bulk(
    State(state): State<ApiState>,
    body: Result<Json<BulkRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    require_account(&req.account_id)?;

    let content = Content::resolve(&state.store, req.message, req.template_id)
        .await
        .map_err(api_error)?;

    let mut recipients = req.recipients;
    let contacts = state
        .store
        .get_contacts(&req.contact_ids)
        .await
        .map_err(api_error)?;
    recipients.extend(contacts.into_iter().map(|c| c.phone));

    let report = state
        .dispatcher
        .send_bulk(&req.account_id, &recipients, &content, &req.variables)
        .await
        .map_err(api_error)?;

    Ok(Json(json!(report)))
}

/// `GET /api/messages?account_id=&limit=&offset=`
pub(super) async fn list(State(state): State<ApiState>, Query(q): Query<LogQuery>) -> ApiResult {
    let messages = state
        .store
        .list_messages(q.account_id.as_deref(), q.limit, q.offset)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "messages": messages })))
}
