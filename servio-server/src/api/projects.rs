use super::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use servio_core::{CreateProjectRequest, Error, Project, UpdateProjectRequest};
use tracing::warn;

pub(super) async fn fetch(state: &AppState, id: i64) -> ApiResult<Project> {
    state
        .store
        .get_project(id)
        .await?
        .ok_or_else(|| ApiError(Error::NotFound { entity: "project", id }))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.store.list_projects().await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    if req.name.is_empty() {
        return Err(Error::Validation("project name is required".to_string()).into());
    }

    let project = state.store.create_project(&req).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// A project with its services, each carrying live supervisor status.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Project>> {
    let mut project = fetch(&state, id).await?;
    for service in &mut project.services {
        service.status = super::services::derive_status(&state, service).await;
    }
    Ok(Json(project))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProjectRequest>,
) -> ApiResult<Json<Project>> {
    if req.name.is_empty() {
        return Err(Error::Validation("project name is required".to_string()).into());
    }

    fetch(&state, id).await?;
    Ok(Json(state.store.update_project(id, &req).await?))
}

/// Deletes a project: every child unit is uninstalled first (per-unit
/// failures are logged and skipped), then the row is deleted and the
/// store cascades the service rows.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let project = fetch(&state, id).await?;

    for service in &project.services {
        if let Err(e) = state.systemd.uninstall_service(&service.unit_name()).await {
            warn!(service = %service.name, error = %e, "failed to uninstall service");
        }
    }

    state.store.delete_project(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
