use super::error::{ApiError, ApiResult};
use crate::git;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use servio_core::{CreateServiceRequest, Error, Service, UpdateServiceRequest};
use std::convert::Infallible;
use tracing::{info, warn};

async fn fetch(state: &AppState, id: i64) -> ApiResult<Service> {
    state
        .store
        .get_service(id)
        .await?
        .ok_or_else(|| ApiError(Error::NotFound { entity: "service", id }))
}

/// Derives the operator-facing status string from supervisor state.
pub(super) async fn derive_status(state: &AppState, service: &Service) -> String {
    let unit = service.unit_name();
    let status = state.systemd.status(&unit).await;
    if status.active {
        "running".to_string()
    } else if state.systemd.service_exists(&unit) {
        "stopped".to_string()
    } else {
        "not installed".to_string()
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    project_id: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Service>>> {
    let project_id = query
        .project_id
        .ok_or_else(|| Error::Validation("project_id is required".to_string()))?;
    Ok(Json(state.store.list_services_by_project(project_id).await?))
}

/// Creates a service. The persisted record is the primary outcome; the
/// follow-up clone and unit install are best-effort and the operator can
/// retry them through the explicit install action.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateServiceRequest>,
) -> ApiResult<(StatusCode, Json<Service>)> {
    if req.name.is_empty() {
        return Err(Error::Validation("service name is required".to_string()).into());
    }
    if !req.git_repo_url.is_empty() && !git::is_valid_git_url(&req.git_repo_url) {
        return Err(Error::Validation(format!(
            "invalid git repository URL: {}",
            req.git_repo_url
        ))
        .into());
    }
    if state.store.get_project(req.project_id).await?.is_none() {
        return Err(Error::NotFound {
            entity: "project",
            id: req.project_id,
        }
        .into());
    }

    let service = state.store.create_service(&req).await?;

    if !service.git_repo_url.is_empty() && !service.working_dir.is_empty() {
        if let Err(e) = git::clone_or_update(&service.git_repo_url, &service.working_dir).await {
            warn!(service = %service.name, error = %e, "failed to clone repository");
        }
    }

    if let Err(e) = state.systemd.install_service(&service).await {
        warn!(service = %service.name, error = %e, "failed to install service");
    }

    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Service>> {
    let mut service = fetch(&state, id).await?;
    service.status = derive_status(&state, &service).await;
    Ok(Json(service))
}

/// Updates a service and reinstalls + restarts its unit.
///
/// For blueprint-managed kinds the submitted command is compared against
/// what the blueprint would generate for the updated record; when they
/// match, the stored command is cleared so later blueprint changes flow
/// through dynamically.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut req): Json<UpdateServiceRequest>,
) -> ApiResult<Json<Service>> {
    if req.name.is_empty() {
        return Err(Error::Validation("service name is required".to_string()).into());
    }

    let existing = fetch(&state, id).await?;

    if let Some(bp) = state.blueprints.get(&existing.kind) {
        let mut probe = existing.clone();
        probe.port = req.port;
        probe.config = req.config.clone();
        if req.command == bp.generate_command(&probe) {
            info!(service = %existing.name, "command matches blueprint, clearing for dynamic generation");
            req.command = String::new();
        }
    }

    let service = state.store.update_service(id, &req).await?;

    if let Err(e) = state.systemd.install_service(&service).await {
        warn!(service = %service.name, error = %e, "failed to reinstall service");
    }
    if let Err(e) = state.systemd.restart(&service.unit_name()).await {
        warn!(service = %service.name, error = %e, "failed to restart service after update");
    }

    Ok(Json(service))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let service = fetch(&state, id).await?;

    if let Err(e) = state.systemd.uninstall_service(&service.unit_name()).await {
        warn!(service = %service.name, error = %e, "failed to uninstall service");
    }

    state.store.delete_service(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Lifecycle ---

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let service = fetch(&state, id).await?;
    state.systemd.start(&service.unit_name()).await?;
    Ok(Json(json!({ "status": "started" })))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let service = fetch(&state, id).await?;
    state.systemd.stop(&service.unit_name()).await?;
    Ok(Json(json!({ "status": "stopped" })))
}

pub async fn restart(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let service = fetch(&state, id).await?;
    state.systemd.restart(&service.unit_name()).await?;
    Ok(Json(json!({ "status": "restarted" })))
}

/// Explicit install action: install the unit, enable it (best-effort),
/// start it.
pub async fn install(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let service = fetch(&state, id).await?;
    let unit = service.unit_name();

    state.systemd.install_service(&service).await?;
    if let Err(e) = state.systemd.enable(&unit).await {
        warn!(service = %service.name, error = %e, "failed to enable service");
    }
    state.systemd.start(&unit).await?;

    Ok(Json(json!({ "status": "installed" })))
}

pub async fn uninstall(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let service = fetch(&state, id).await?;
    state.systemd.uninstall_service(&service.unit_name()).await?;
    Ok(Json(json!({ "status": "uninstalled" })))
}

/// First-install flow: blueprint dependency install, then unit install,
/// enable, start. Each failure short-circuits the chain.
pub async fn provision(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let service = fetch(&state, id).await?;

    let blueprint = state.blueprints.get(&service.kind).ok_or_else(|| {
        Error::Validation(format!(
            "no blueprint found for service type '{}'",
            service.kind
        ))
    })?;

    blueprint.install_dependencies(&service.version).await?;

    let unit = service.unit_name();
    state.systemd.install_service(&service).await?;
    state.systemd.enable(&unit).await?;
    state.systemd.start(&unit).await?;

    Ok(Json(json!({ "status": "provisioned" })))
}

// --- Logs ---

/// Journal output since the unit last became active, falling back to the
/// service's creation time when the supervisor has no record.
pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let service = fetch(&state, id).await?;
    let unit = service.unit_name();

    let mut since = state.systemd.start_time(&unit).await.unwrap_or_default();
    if since.is_empty() {
        since = service.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
    }

    let logs = state.systemd.logs(&unit, &since, "").await?;
    Ok(Json(json!({ "logs": logs })))
}

/// Live log tail as server-sent events, one `data:` frame per journal
/// line. Client disconnect drops the stream, which terminates the
/// underlying follow subprocess.
pub async fn stream_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let service = fetch(&state, id).await?;
    let mut rx: tokio::sync::mpsc::Receiver<String> =
        state.systemd.stream_logs(&service.unit_name())?;

    let stream = async_stream::stream! {
        while let Some(line) = rx.recv().await {
            yield Ok(Event::default().data(line));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
