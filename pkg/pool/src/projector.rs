//! Renders the ResourceQuota each member namespace should carry.

use pkg_constants::pool::POOL_LABEL;
use pkg_types::pool::ResourcePool;
use pkg_types::quota::{ResourceQuota, ResourceQuotaSpec};
use pkg_types::{ObjectMeta, Quantity, ResourceList};

use crate::binder::{BindingPlan, namespace_sum};

/// Desired quota for one member namespace. `hard == None` means no object.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaProjection {
    pub namespace: String,
    pub hard: Option<ResourceList>,
}

/// `spec.defaults`, plus a zero for every other hard key when the pool
/// assigns zero defaults.
pub fn effective_defaults(pool: &ResourcePool) -> ResourceList {
    let mut defaults = pool.spec.defaults.clone();
    if pool.spec.config.defaults_assign_zero() {
        for name in pool.spec.quota.hard.keys() {
            defaults
                .entry(name.clone())
                .or_insert_with(Quantity::zero);
        }
    }
    defaults
}

/// Hard map for a namespace whose bound claims add up to `sum`.
pub fn render_hard(pool: &ResourcePool, sum: &ResourceList) -> Option<ResourceList> {
    let mut hard = effective_defaults(pool);
    if sum.is_empty() && hard.is_empty() {
        return None;
    }
    for (name, amount) in sum {
        hard.insert(name.clone(), *amount);
    }
    Some(hard)
}

/// One projection per member namespace, in member order.
pub fn render(pool: &ResourcePool, plan: &BindingPlan, members: &[String]) -> Vec<QuotaProjection> {
    members
        .iter()
        .map(|ns| QuotaProjection {
            namespace: ns.clone(),
            hard: render_hard(pool, &namespace_sum(plan, ns)),
        })
        .collect()
}

/// The full ResourceQuota object for `namespace`.
pub fn build_quota(pool: &ResourcePool, namespace: &str, hard: ResourceList) -> ResourceQuota {
    let mut metadata = ObjectMeta::namespaced(namespace, pool.quota_name());
    metadata
        .labels
        .insert(POOL_LABEL.to_string(), pool.name().to_string());
    metadata.set_controller_owner(pool.owner_reference());
    ResourceQuota {
        metadata,
        spec: ResourceQuotaSpec {
            hard,
            scopes: pool.spec.quota.scopes.clone(),
            scope_selector: pool.spec.quota.scope_selector.clone(),
        },
    }
}

/// Fold the desired state into `existing`. Returns true if anything the
/// projection owns (spec, pool label, owner reference) changed.
pub fn merge_into(existing: &mut ResourceQuota, desired: &ResourceQuota) -> bool {
    let mut changed = false;
    if existing.spec != desired.spec {
        existing.spec = desired.spec.clone();
        changed = true;
    }
    for (k, v) in &desired.metadata.labels {
        if existing.metadata.labels.get(k) != Some(v) {
            existing.metadata.labels.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    if let Some(owner) = desired.metadata.controller_owner() {
        if existing.metadata.controller_owner() != Some(owner) {
            existing.metadata.set_controller_owner(owner.clone());
            changed = true;
        }
    }
    changed
}
