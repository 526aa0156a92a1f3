use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use pkg_admission::claim::{auto_assign, validate_claim, validate_claim_delete, validate_claim_update};
use pkg_constants::state::{RESOURCE_POOL_CLAIMS_PREFIX, RESOURCE_POOLS_PREFIX};
use pkg_types::claim::{ResourcePoolClaim, ResourcePoolClaimStatus};
use pkg_types::namespace::Namespace;
use pkg_types::pool::ResourcePool;
use tracing::info;

use super::{merge_meta, prepare_create};
use crate::AppState;
use crate::error::{ApiError, ApiResult};

/// Claims are created in an existing namespace. An empty `spec.pool` is
/// filled in by auto-assignment when a compatible pool exists.
pub async fn create_claim(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Json(mut claim): Json<ResourcePoolClaim>,
) -> ApiResult<(StatusCode, Json<ResourcePoolClaim>)> {
    prepare_create(&mut claim.metadata);
    claim.metadata.namespace = Some(ns.clone());
    claim.status = ResourcePoolClaimStatus::default();

    let namespace: Namespace = state
        .store
        .get_object(&Namespace::key_for(&ns))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("namespace {}", ns)))?;
    assign(&state, &mut claim, Some(&namespace)).await?;
    validate_claim(&claim)?;

    let claim = state.store.create(claim).await?;
    info!(
        "Created resourcepoolclaim {} (pool={})",
        claim.full_name(),
        claim.spec.pool
    );
    Ok((StatusCode::CREATED, Json(claim)))
}

pub async fn list_claims(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> ApiResult<Json<Vec<ResourcePoolClaim>>> {
    let prefix = format!("{}{}/", RESOURCE_POOL_CLAIMS_PREFIX, ns);
    Ok(Json(state.store.list_objects(&prefix).await?))
}

pub async fn get_claim(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Json<ResourcePoolClaim>> {
    load(&state, &ns, &name).await.map(Json)
}

/// Spec and labels come from the request. A bound claim's pool and
/// requested resources are frozen.
pub async fn update_claim(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
    Json(body): Json<ResourcePoolClaim>,
) -> ApiResult<Json<ResourcePoolClaim>> {
    let existing = load(&state, &ns, &name).await?;
    let mut claim = existing.clone();
    claim.metadata = merge_meta(&existing.metadata, body.metadata);
    claim.spec = body.spec;
    validate_claim_update(&existing, &claim)?;

    if claim.spec.pool.is_empty() {
        let namespace: Option<Namespace> =
            state.store.get_object(&Namespace::key_for(&ns)).await?;
        assign(&state, &mut claim, namespace.as_ref()).await?;
    }
    if claim.spec != existing.spec {
        claim.metadata.generation += 1;
    }

    let claim = state.store.update(claim).await?;
    info!("Updated resourcepoolclaim {}", claim.full_name());
    Ok(Json(claim))
}

/// Bound claims cannot be deleted; they are released first with the
/// `quotapool.io/release` annotation, or deleted by a cascading pool delete.
pub async fn delete_claim(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Json<ResourcePoolClaim>> {
    let existing = load(&state, &ns, &name).await?;
    validate_claim_delete(&existing)?;
    state
        .store
        .delete_object::<ResourcePoolClaim>(&ResourcePoolClaim::key_for(&ns, &name))
        .await?;
    info!("Deleted resourcepoolclaim {}", existing.full_name());
    Ok(Json(existing))
}

async fn assign(
    state: &AppState,
    claim: &mut ResourcePoolClaim,
    namespace: Option<&Namespace>,
) -> ApiResult<()> {
    if !claim.spec.pool.is_empty() {
        return Ok(());
    }
    let pools: Vec<ResourcePool> = state.store.list_objects(RESOURCE_POOLS_PREFIX).await?;
    if let Some(pool) = auto_assign(claim, namespace, &pools)? {
        info!("Auto-assigned resourcepoolclaim {} to pool {}", claim.full_name(), pool);
    }
    Ok(())
}

async fn load(state: &AppState, ns: &str, name: &str) -> ApiResult<ResourcePoolClaim> {
    state
        .store
        .get_object(&ResourcePoolClaim::key_for(ns, name))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("resourcepoolclaim {}/{}", ns, name)))
}
