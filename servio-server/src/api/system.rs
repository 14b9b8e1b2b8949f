use super::error::ApiResult;
use super::projects;
use crate::monitor::Stats;
use crate::state::AppState;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;
use servio_core::Error;
use std::collections::HashMap;

// --- Stats ---

/// Host statistics plus a per-unit sample for every known service.
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<Stats>> {
    let mut unit_names = Vec::new();
    for project in state.store.list_projects().await? {
        for service in state.store.list_services_by_project(project.id).await? {
            unit_names.push(service.unit_name());
        }
    }

    Ok(Json(state.monitor.get_stats(&unit_names).await))
}

// --- Blueprints ---

#[derive(Debug, Deserialize)]
pub struct BlueprintQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    version: Option<String>,
}

/// All blueprint metadata, or the form defaults for one blueprint when
/// `type` (and optionally `version`) is supplied.
pub async fn blueprints(
    State(state): State<AppState>,
    Query(query): Query<BlueprintQuery>,
) -> Response {
    match query.kind {
        Some(kind) => {
            let version = query.version.unwrap_or_default();
            match state.blueprints.defaults(&kind, &version) {
                Some(defaults) => Json(defaults).into_response(),
                None => (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": "blueprint not found" })),
                )
                    .into_response(),
            }
        }
        None => Json(state.blueprints.all_metadata()).into_response(),
    }
}

// --- Nginx site management ---

pub async fn nginx_preview(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = projects::fetch(&state, project_id).await?;

    let config = state.nginx.generate_site(&project)?;
    let default_config = state.nginx.generate_default(&project).unwrap_or_default();

    Ok(Json(json!({
        "config": config,
        "default_config": default_config,
        "path": state.nginx.site_path(&project),
        "installed": state.nginx.site_exists(&project),
        "is_customized": !project.nginx_raw.is_empty(),
    })))
}

pub async fn nginx_deploy(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = projects::fetch(&state, project_id).await?;

    if project.domain.is_empty() {
        return Err(Error::Validation("project has no domain configured".to_string()).into());
    }

    state.nginx.install_site(&project).await?;
    Ok(Json(json!({ "status": "deployed", "domain": project.domain })))
}

pub async fn nginx_remove(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = projects::fetch(&state, project_id).await?;
    state.nginx.uninstall_site(&project).await?;
    Ok(Json(json!({ "status": "removed" })))
}

#[derive(Debug, Deserialize)]
pub struct SaveSiteBody {
    #[serde(default)]
    config: String,
}

/// Overwrites the project's verbatim site override.
pub async fn nginx_save(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Json(body): Json<SaveSiteBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = projects::fetch(&state, project_id).await?;
    state
        .store
        .update_project_nginx_raw(project.id, &body.config)
        .await?;
    Ok(Json(json!({ "status": "saved" })))
}

// --- Settings ---

#[derive(Debug, Deserialize)]
struct SettingBody {
    #[serde(default)]
    value: String,
}

/// Upserts a setting. The value is accepted as a JSON `{"value": ...}`
/// body, a form field named `value`, or a form field named after the key
/// itself (the UI posts `distro=ubuntu`).
pub async fn set_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    request: Request,
) -> ApiResult<Json<serde_json::Value>> {
    if key.is_empty() {
        return Err(Error::Validation("missing setting key".to_string()).into());
    }

    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    let value = if is_json {
        let Json(body) = Json::<SettingBody>::from_request(request, &())
            .await
            .map_err(|e| Error::Validation(format!("invalid request body: {e}")))?;
        body.value
    } else {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|e| Error::Validation(format!("invalid form body: {e}")))?;
        fields
            .get("value")
            .or_else(|| fields.get(&key))
            .cloned()
            .unwrap_or_default()
    };

    if value.is_empty() {
        return Err(Error::Validation("missing setting value".to_string()).into());
    }

    state.store.set_setting(&key, &value).await?;

    // The distro choice re-targets the site-file layout immediately.
    if key == "distro" {
        state.nginx.configure(&value);
    }

    Ok(Json(json!({ "status": "saved" })))
}
