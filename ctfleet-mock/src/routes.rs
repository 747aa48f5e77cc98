use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::{AppState, Fault, Resource, ResourceStatus};

type ApiResult<T> = Result<T, (StatusCode, String)>;

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: ResourceStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub hostname: String,
    pub cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

#[derive(Deserialize)]
pub struct StopQuery {
    #[serde(default = "default_graceful")]
    pub graceful: bool,
}

fn default_graceful() -> bool {
    true
}

fn not_found(id: u32) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("resource {} not found", id))
}

fn fault_response(fault: Fault) -> (StatusCode, String) {
    let status =
        StatusCode::from_u16(fault.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, fault.message)
}

/// Record the request, reject unknown nodes and replay injected faults.
async fn enter(state: &AppState, method: &str, uri: &Uri, node: &str, id: u32) -> ApiResult<()> {
    let path = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |p| p.as_str().to_string());
    if let Some(fault) = state.enter(method, path, id).await {
        return Err(fault_response(fault));
    }
    if node != state.node {
        return Err((StatusCode::NOT_FOUND, format!("node {} not found", node)));
    }
    Ok(())
}

async fn current(state: &AppState, id: u32) -> ApiResult<Resource> {
    state
        .inner
        .read()
        .await
        .resources
        .get(&id)
        .cloned()
        .ok_or_else(|| not_found(id))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path((node, id)): Path<(String, u32)>,
    uri: Uri,
) -> ApiResult<Json<StatusResponse>> {
    enter(&state, "GET", &uri, &node, id).await?;
    let resource = current(&state, id).await?;
    Ok(Json(StatusResponse {
        status: resource.status,
    }))
}

pub async fn get_config(
    State(state): State<AppState>,
    Path((node, id)): Path<(String, u32)>,
    uri: Uri,
) -> ApiResult<Json<ConfigResponse>> {
    enter(&state, "GET", &uri, &node, id).await?;
    let resource = current(&state, id).await?;
    Ok(Json(ConfigResponse {
        hostname: resource.hostname,
        cores: resource.cores,
        memory_mb: resource.memory_mb,
        disk_gb: resource.disk_gb,
    }))
}

pub async fn create_resource(
    State(state): State<AppState>,
    Path(node): Path<String>,
    uri: Uri,
    Json(mut resource): Json<Resource>,
) -> ApiResult<StatusCode> {
    enter(&state, "POST", &uri, &node, resource.id).await?;
    if current(&state, resource.id).await.is_ok() {
        return Err((
            StatusCode::CONFLICT,
            format!("resource {} already exists", resource.id),
        ));
    }

    info!("Creating resource {} ({})", resource.id, resource.hostname);
    resource.status = ResourceStatus::Created;
    state.provision(resource).await;
    Ok(StatusCode::CREATED)
}

pub async fn start_resource(
    State(state): State<AppState>,
    Path((node, id)): Path<(String, u32)>,
    uri: Uri,
) -> ApiResult<StatusCode> {
    enter(&state, "POST", &uri, &node, id).await?;
    current(&state, id).await?;

    info!("Starting resource {}", id);
    state.transition(id, ResourceStatus::Running).await;
    Ok(StatusCode::ACCEPTED)
}

pub async fn stop_resource(
    State(state): State<AppState>,
    Path((node, id)): Path<(String, u32)>,
    Query(query): Query<StopQuery>,
    uri: Uri,
) -> ApiResult<StatusCode> {
    enter(&state, "POST", &uri, &node, id).await?;
    current(&state, id).await?;

    info!("Stopping resource {} (graceful={})", id, query.graceful);
    state.transition(id, ResourceStatus::Stopped).await;
    Ok(StatusCode::ACCEPTED)
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path((node, id)): Path<(String, u32)>,
    uri: Uri,
) -> ApiResult<StatusCode> {
    enter(&state, "DELETE", &uri, &node, id).await?;
    let resource = current(&state, id).await?;
    if resource.status == ResourceStatus::Running {
        return Err((
            StatusCode::CONFLICT,
            format!("resource {} is running", id),
        ));
    }

    info!("Deleting resource {}", id);
    state.transition(id, ResourceStatus::Absent).await;
    Ok(StatusCode::ACCEPTED)
}
