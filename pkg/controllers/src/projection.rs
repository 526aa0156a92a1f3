//! Writes projected ResourceQuota objects into the store.

use pkg_constants::pool::RESOURCE_POOL_KIND;
use pkg_constants::state::{RESOURCE_POOLS_PREFIX, RESOURCE_QUOTAS_PREFIX};
use pkg_pool::projector::{QuotaProjection, build_quota, merge_into};
use pkg_state::{StateStore, StoreError};
use pkg_types::Object;
use pkg_types::pool::ResourcePool;
use pkg_types::quota::ResourceQuota;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// Quota objects whose controller owner is `pool_uid`.
pub async fn owned_quotas(store: &StateStore, pool_uid: &str) -> anyhow::Result<Vec<ResourceQuota>> {
    let all: Vec<ResourceQuota> = store.list_objects(RESOURCE_QUOTAS_PREFIX).await?;
    Ok(all
        .into_iter()
        .filter(|q| q.metadata.is_owned_by(pool_uid))
        .collect())
}

/// Bring the quota objects of `pool` in line with `projections`: create or
/// update where a hard map is rendered, delete where none is, and delete
/// owned objects in namespaces that are no longer members. Returns the
/// number of objects written or removed.
pub async fn sync(
    store: &StateStore,
    pool: &ResourcePool,
    projections: &[QuotaProjection],
    retries: u32,
) -> anyhow::Result<usize> {
    let mut writes = 0;
    let members: BTreeSet<&str> = projections.iter().map(|p| p.namespace.as_str()).collect();
    let quota_name = pool.quota_name();

    for projection in projections {
        let key = ResourceQuota::key_for(&projection.namespace, &quota_name);
        let Some(hard) = &projection.hard else {
            if let Some(existing) = store.get_object::<ResourceQuota>(&key).await?
                && existing.metadata.is_owned_by(pool.uid())
            {
                store.delete_object::<ResourceQuota>(&key).await?;
                debug!("ResourcePool {}: removed empty quota in {}", pool.name(), projection.namespace);
                writes += 1;
            }
            continue;
        };

        let desired = build_quota(pool, &projection.namespace, hard.clone());
        if store.get_object::<ResourceQuota>(&key).await?.is_none() {
            match store.create(desired.clone()).await {
                Ok(_) => {
                    info!("ResourcePool {}: created quota in {}", pool.name(), projection.namespace);
                    writes += 1;
                    continue;
                }
                // Lost a race with another writer; fall through to merge.
                Err(StoreError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut changed = false;
        store
            .update_with_retry::<ResourceQuota, _>(&key, retries, |existing| {
                changed = merge_into(existing, &desired);
                changed
            })
            .await?;
        if changed {
            debug!("ResourcePool {}: updated quota in {}", pool.name(), projection.namespace);
            writes += 1;
        }
    }

    for stale in owned_quotas(store, pool.uid()).await? {
        if members.contains(stale.namespace()) {
            continue;
        }
        store.delete_object::<ResourceQuota>(&stale.key()).await?;
        info!(
            "ResourcePool {}: removed quota from former member {}",
            pool.name(),
            stale.namespace()
        );
        writes += 1;
    }
    Ok(writes)
}

/// Delete every quota object owned by `pool_uid`.
pub async fn delete_owned(store: &StateStore, pool_uid: &str) -> anyhow::Result<usize> {
    let owned = owned_quotas(store, pool_uid).await?;
    for quota in &owned {
        store.delete_object::<ResourceQuota>(&quota.key()).await?;
    }
    Ok(owned.len())
}

/// Strip `pool_uid` from the owner references of its quota objects and
/// leave them in place.
pub async fn orphan_owned(store: &StateStore, pool_uid: &str, retries: u32) -> anyhow::Result<usize> {
    let owned = owned_quotas(store, pool_uid).await?;
    for quota in &owned {
        store
            .update_with_retry::<ResourceQuota, _>(&quota.key(), retries, |q| {
                q.metadata.remove_owner(pool_uid)
            })
            .await?;
    }
    Ok(owned.len())
}

/// Delete quota objects whose owning pool no longer exists.
pub async fn collect_garbage(store: &StateStore) -> anyhow::Result<usize> {
    // Quotas first: any quota seen here was written after its pool existed.
    let quotas: Vec<ResourceQuota> = store.list_objects(RESOURCE_QUOTAS_PREFIX).await?;
    let pools: Vec<ResourcePool> = store.list_objects(RESOURCE_POOLS_PREFIX).await?;
    let live: HashSet<&str> = pools.iter().map(|p| p.uid()).collect();

    let mut removed = 0;
    for quota in &quotas {
        let Some(owner) = quota.metadata.controller_owner() else {
            continue;
        };
        if owner.kind != RESOURCE_POOL_KIND || live.contains(owner.uid.as_str()) {
            continue;
        }
        store.delete_object::<ResourceQuota>(&quota.key()).await?;
        info!(
            "Garbage collected quota {}/{} of vanished pool {}",
            quota.namespace(),
            quota.metadata.name,
            owner.name
        );
        removed += 1;
    }
    Ok(removed)
}
