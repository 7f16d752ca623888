use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use wagate_core::{error::WagateError, template, types::Template};

use super::{api_error, json_body, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub(super) struct CreateTemplate {
    name: String,
    body: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateTemplate {
    name: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct PreviewRequest {
    #[serde(default)]
    variables: HashMap<String, String>,
}

fn template_json(t: &Template) -> Value {
    json!({
        "id": t.id,
        "name": t.name,
        "body": t.body,
        "placeholders": template::placeholders(&t.body),
        "created_at": t.created_at,
        "updated_at": t.updated_at,
    })
}

/// `GET /api/templates`
pub(super) async fn list(State(state): State<ApiState>) -> ApiResult {
    let templates = state.store.list_templates().await.map_err(api_error)?;
    let out: Vec<Value> = templates.iter().map(template_json).collect();
    Ok(Json(json!({ "templates": out })))
}

/// `POST /api/templates`
pub(super) async fn create(
    State(state): State<ApiState>,
    body: Result<Json<CreateTemplate>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let req = json_body(body)?;
    template::validate(&req.name, &req.body).map_err(api_error)?;

    let created = state
        .store
        .create_template(req.name.trim(), &req.body)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(template_json(&created))))
}

/// `GET /api/templates/{id}`
pub(super) async fn fetch(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let t = state.store.get_template(&id).await.map_err(api_error)?;
    Ok(Json(template_json(&t)))
}

/// `PUT /api/templates/{id}` — fields left out keep their stored value.
pub(super) async fn update(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateTemplate>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    if req.name.is_none() && req.body.is_none() {
        return Err(api_error(WagateError::Validation(
            "nothing to update: provide name or body".into(),
        )));
    }

    // Validate the merged result so a partial update can't produce an invalid template.
    let current = state.store.get_template(&id).await.map_err(api_error)?;
    let name = req.name.as_deref().map(str::trim);
    template::validate(
        name.unwrap_or(&current.name),
        req.body.as_deref().unwrap_or(&current.body),
    )
    .map_err(api_error)?;

    let updated = state
        .store
        .update_template(&id, name, req.body.as_deref())
        .await
        .map_err(api_error)?;
    Ok(Json(template_json(&updated)))
}

/// `DELETE /api/templates/{id}`
pub(super) async fn remove(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    state.store.delete_template(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

/// `POST /api/templates/{id}/preview` — render without sending.
pub(super) async fn preview(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<PreviewRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    let t = state.store.get_template(&id).await.map_err(api_error)?;

    let missing: Vec<String> = template::placeholders(&t.body)
        .into_iter()
        .filter(|p| !req.variables.contains_key(p))
        .collect();

    Ok(Json(json!({
        "rendered": template::render(&t.body, &req.variables),
        "missing": missing,
    })))
}
