use axum::{
    Json,
    extract::{Path, State},
};
use pkg_types::quota::ResourceQuota;

use crate::AppState;
use crate::error::ApiResult;

/// Projected quota objects in a namespace. Read-only: the pool controller
/// owns them.
pub async fn list_quotas(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> ApiResult<Json<Vec<ResourceQuota>>> {
    let quotas = state
        .store
        .list_objects(&ResourceQuota::namespace_prefix(&ns))
        .await?;
    Ok(Json(quotas))
}
