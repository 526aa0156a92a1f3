use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use pkg_admission::pool::{default_pool, validate_pool, validate_pool_update};
use pkg_constants::state::RESOURCE_POOLS_PREFIX;
use pkg_types::pool::{ResourcePool, ResourcePoolStatus};
use tracing::info;

use super::{delete_response, merge_meta, prepare_create};
use crate::AppState;
use crate::error::{ApiError, ApiResult};

pub async fn create_pool(
    State(state): State<AppState>,
    Json(mut pool): Json<ResourcePool>,
) -> ApiResult<(StatusCode, Json<ResourcePool>)> {
    prepare_create(&mut pool.metadata);
    pool.metadata.namespace = None;
    pool.status = ResourcePoolStatus::default();
    default_pool(&mut pool);
    validate_pool(&pool)?;
    let pool = state.store.create(pool).await?;
    info!("Created resourcepool: {}", pool.name());
    Ok((StatusCode::CREATED, Json(pool)))
}

pub async fn list_pools(State(state): State<AppState>) -> ApiResult<Json<Vec<ResourcePool>>> {
    Ok(Json(state.store.list_objects(RESOURCE_POOLS_PREFIX).await?))
}

pub async fn get_pool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ResourcePool>> {
    load(&state, &name).await.map(Json)
}

/// Spec and labels come from the request; status stays controller-owned.
/// Hard limits may not drop below what the last persisted status claims.
pub async fn update_pool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ResourcePool>,
) -> ApiResult<Json<ResourcePool>> {
    let existing = load(&state, &name).await?;
    let mut pool = existing.clone();
    pool.metadata = merge_meta(&existing.metadata, body.metadata);
    pool.spec = body.spec;
    default_pool(&mut pool);
    validate_pool_update(&existing, &pool)?;
    if pool.spec != existing.spec {
        pool.metadata.generation += 1;
    }
    let pool = state.store.update(pool).await?;
    info!("Updated resourcepool: {}", name);
    Ok(Json(pool))
}

/// Marks the pool for deletion while claims are bound; the pool controller
/// finishes the delete.
pub async fn delete_pool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<ResourcePool>)> {
    let outcome = state
        .store
        .request_delete::<ResourcePool>(&ResourcePool::key_for(&name))
        .await?;
    info!("Delete requested for resourcepool: {}", name);
    Ok(delete_response(outcome))
}

async fn load(state: &AppState, name: &str) -> ApiResult<ResourcePool> {
    state
        .store
        .get_object(&ResourcePool::key_for(name))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("resourcepool {}", name)))
}
