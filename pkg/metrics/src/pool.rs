//! Per-pool gauges derived from a persisted ResourcePool status.

use pkg_types::Quantity;
use pkg_types::pool::ResourcePool;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::MetricsRegistry;

pub const POOL_LIMIT: &str = "quotapool_pool_limit";
pub const POOL_USAGE: &str = "quotapool_pool_usage";
pub const POOL_USAGE_PERCENTAGE: &str = "quotapool_pool_usage_percentage";
pub const POOL_AVAILABLE: &str = "quotapool_pool_available";
pub const POOL_EXHAUSTION: &str = "quotapool_pool_exhaustion";
pub const POOL_EXHAUSTION_PERCENTAGE: &str = "quotapool_pool_exhaustion_percentage";
pub const POOL_NAMESPACE_USAGE: &str = "quotapool_pool_namespace_usage";
pub const POOL_NAMESPACES: &str = "quotapool_pool_namespaces";
pub const POOL_CLAIMS: &str = "quotapool_pool_claims";

pub const POOL_RECONCILES: &str = "quotapool_pool_reconcile_total";
pub const POOL_RECONCILE_ERRORS: &str = "quotapool_pool_reconcile_errors_total";
pub const CLAIM_RECONCILES: &str = "quotapool_claim_reconcile_total";
pub const CLAIM_RECONCILE_ERRORS: &str = "quotapool_claim_reconcile_errors_total";

/// Writes pool gauges into a shared registry.
#[derive(Clone)]
pub struct PoolRecorder {
    registry: Arc<MetricsRegistry>,
}

impl PoolRecorder {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        let r = &registry;
        r.register_gauge_family(POOL_LIMIT, "Hard limit for a resource in a pool", &["pool", "resource"]);
        r.register_gauge_family(POOL_USAGE, "Claimed amount of a resource in a pool", &["pool", "resource"]);
        r.register_gauge_family(
            POOL_USAGE_PERCENTAGE,
            "Claimed amount of a resource in a pool (percentage of the limit)",
            &["pool", "resource"],
        );
        r.register_gauge_family(POOL_AVAILABLE, "Unclaimed amount of a resource in a pool", &["pool", "resource"]);
        r.register_gauge_family(
            POOL_EXHAUSTION,
            "Amount requested by claims that did not fit, per resource",
            &["pool", "resource"],
        );
        r.register_gauge_family(
            POOL_EXHAUSTION_PERCENTAGE,
            "Requested amount above what is available (percentage of available)",
            &["pool", "resource"],
        );
        r.register_gauge_family(
            POOL_NAMESPACE_USAGE,
            "Claimed amount of a resource in a pool for one namespace",
            &["pool", "target_namespace", "resource"],
        );
        r.register_gauge_family(POOL_NAMESPACES, "Member namespaces of a pool", &["pool"]);
        r.register_gauge_family(POOL_CLAIMS, "Claims bound to a pool", &["pool"]);
        r.register_counter(POOL_RECONCILES, "ResourcePool reconcile passes");
        r.register_counter(POOL_RECONCILE_ERRORS, "ResourcePool reconcile passes that failed");
        r.register_counter(CLAIM_RECONCILES, "ResourcePoolClaim reconcile passes");
        r.register_counter(CLAIM_RECONCILE_ERRORS, "ResourcePoolClaim reconcile passes that failed");
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Replace every series of `pool` with values from its status. Resources
    /// or namespaces that disappeared from the status lose their series.
    pub fn record(&self, pool: &ResourcePool) {
        let r = &self.registry;
        let name = pool.name();
        self.forget(name);

        let alloc = &pool.status.allocation;
        for (resource, hard) in &alloc.hard {
            let limit = as_f64(hard);
            r.family_set(POOL_LIMIT, &[name, resource], limit);
            if let Some(claimed) = alloc.claimed.get(resource) {
                let used = as_f64(claimed);
                r.family_set(POOL_USAGE, &[name, resource], used);
                let pct = if limit > 0.0 { used / limit * 100.0 } else { 0.0 };
                r.family_set(POOL_USAGE_PERCENTAGE, &[name, resource], pct);
            }
            if let Some(available) = alloc.available.get(resource) {
                r.family_set(POOL_AVAILABLE, &[name, resource], as_f64(available));
            }
        }

        for (resource, ex) in &pool.status.exhaustions {
            let available = as_f64(&ex.available);
            let requesting = as_f64(&ex.requesting);
            r.family_set(POOL_EXHAUSTION, &[name, resource], requesting);
            if available > 0.0 && requesting > available {
                let pct = (requesting - available) / available * 100.0;
                r.family_set(POOL_EXHAUSTION_PERCENTAGE, &[name, resource], pct);
            }
        }

        for (namespace, usage) in namespace_usage(pool) {
            for (resource, amount) in usage {
                r.family_set(POOL_NAMESPACE_USAGE, &[name, &namespace, &resource], amount);
            }
        }

        r.family_set(POOL_NAMESPACES, &[name], pool.status.namespace_size as f64);
        r.family_set(POOL_CLAIMS, &[name], pool.status.claim_size as f64);
    }

    /// Drop all series of a pool.
    pub fn forget(&self, pool: &str) {
        self.registry.family_delete_matching(&[("pool", pool)]);
    }
}

fn namespace_usage(pool: &ResourcePool) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut out: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for (namespace, entries) in &pool.status.claims {
        let usage = out.entry(namespace.clone()).or_default();
        for entry in entries {
            for (resource, q) in &entry.claims {
                *usage.entry(resource.clone()).or_default() += as_f64(q);
            }
        }
    }
    out
}

fn as_f64(q: &Quantity) -> f64 {
    q.nanos() as f64 / 1e9
}
