use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use pkg_constants::state::NAMESPACES_PREFIX;
use pkg_types::namespace::Namespace;
use pkg_types::validate::validate_name;
use tracing::info;

use super::{delete_response, merge_meta, prepare_create};
use crate::AppState;
use crate::error::{ApiError, ApiResult};

pub async fn create_namespace(
    State(state): State<AppState>,
    Json(mut ns): Json<Namespace>,
) -> ApiResult<(StatusCode, Json<Namespace>)> {
    validate_name(ns.name()).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    prepare_create(&mut ns.metadata);
    ns.metadata.namespace = None;
    let ns = state.store.create(ns).await?;
    info!("Created namespace: {}", ns.name());
    Ok((StatusCode::CREATED, Json(ns)))
}

pub async fn list_namespaces(State(state): State<AppState>) -> ApiResult<Json<Vec<Namespace>>> {
    Ok(Json(state.store.list_objects(NAMESPACES_PREFIX).await?))
}

pub async fn get_namespace(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Namespace>> {
    state
        .store
        .get_object(&Namespace::key_for(&name))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("namespace {}", name)))
}

/// Labels and phase are writable; label changes drive pool membership.
pub async fn update_namespace(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<Namespace>,
) -> ApiResult<Json<Namespace>> {
    let existing: Namespace = state
        .store
        .get_object(&Namespace::key_for(&name))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("namespace {}", name)))?;
    let ns = Namespace {
        metadata: merge_meta(&existing.metadata, body.metadata),
        phase: body.phase,
    };
    let ns = state.store.update(ns).await?;
    info!("Updated namespace: {}", name);
    Ok(Json(ns))
}

pub async fn delete_namespace(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<Namespace>)> {
    let outcome = state
        .store
        .request_delete::<Namespace>(&Namespace::key_for(&name))
        .await?;
    info!("Deleted namespace: {}", name);
    Ok(delete_response(outcome))
}
