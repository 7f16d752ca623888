use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use wagate_core::{error::WagateError, phone};
use wagate_store::ContactFields;

use super::{api_error, json_body, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub(super) struct ContactRequest {
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListQuery {
    search: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// Trimmed, normalized contact fields. Blank strings count as absent.
struct CleanContact {
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    notes: Option<String>,
}

impl CleanContact {
    fn from_request(req: ContactRequest) -> Result<Self, WagateError> {
        let trimmed = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        let phone = trimmed(req.phone)
            .map(|p| phone::normalize_phone(&p))
            .transpose()?;
        let email = trimmed(req.email);
        if let Some(ref e) = email {
            if !e.contains('@') {
                return Err(WagateError::Validation(format!("invalid email '{e}'")));
            }
        }
        Ok(Self {
            name: trimmed(req.name),
            phone,
            email,
            notes: trimmed(req.notes),
        })
    }

    fn fields(&self) -> ContactFields<'_> {
        ContactFields {
            name: self.name.as_deref(),
            phone: self.phone.as_deref(),
            email: self.email.as_deref(),
            notes: self.notes.as_deref(),
        }
    }
}

/// `GET /api/contacts?search=&limit=&offset=`
pub(super) async fn list(State(state): State<ApiState>, Query(q): Query<ListQuery>) -> ApiResult {
    let contacts = state
        .store
        .list_contacts(q.search.as_deref(), q.limit, q.offset)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "contacts": contacts })))
}

/// `POST /api/contacts`
pub(super) async fn create(
    State(state): State<ApiState>,
    body: Result<Json<ContactRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let clean = CleanContact::from_request(json_body(body)?).map_err(api_error)?;
    if clean.name.is_none() {
        return Err(api_error(WagateError::Validation("name must not be empty".into())));
    }
    if clean.phone.is_none() {
        return Err(api_error(WagateError::Validation("phone number must not be empty".into())));
    }

    let contact = state
        .store
        .create_contact(clean.fields())
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(json!(contact))))
}

/// `GET /api/contacts/{id}`
pub(super) async fn fetch(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let contact = state.store.get_contact(&id).await.map_err(api_error)?;
    Ok(Json(json!(contact)))
}

/// `PUT /api/contacts/{id}` — fields left out keep their stored value.
pub(super) async fn update(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<ContactRequest>, JsonRejection>,
) -> ApiResult {
    let clean = CleanContact::from_request(json_body(body)?).map_err(api_error)?;
    let contact = state
        .store
        .update_contact(&id, clean.fields())
        .await
        .map_err(api_error)?;
    Ok(Json(json!(contact)))
}

/// `DELETE /api/contacts/{id}`
pub(super) async fn remove(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    state.store.delete_contact(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "status": "deleted", "id": id })))
}
