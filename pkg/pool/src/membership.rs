//! Which namespaces a pool's selectors pick up.

use pkg_types::namespace::Namespace;
use pkg_types::pool::ResourcePool;
use pkg_types::selector::{LabelSelector, matches_any};
use std::collections::BTreeSet;

/// Sorted, deduplicated names of the namespaces matching any selector.
/// Terminating namespaces never match.
pub fn resolve(selectors: &[LabelSelector], namespaces: &[Namespace]) -> Vec<String> {
    namespaces
        .iter()
        .filter(|ns| !ns.is_terminating())
        .filter(|ns| matches_any(selectors, &ns.metadata.labels))
        .map(|ns| ns.name().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Membership of `pool`; empty while the pool is being deleted.
pub fn resolve_for_pool(pool: &ResourcePool, namespaces: &[Namespace]) -> Vec<String> {
    if pool.metadata.is_deleting() {
        return Vec::new();
    }
    resolve(&pool.spec.selectors, namespaces)
}

/// Pools whose selectors match `namespace`, by pool name.
pub fn pools_for_namespace<'a>(
    pools: &'a [ResourcePool],
    namespace: &Namespace,
) -> Vec<&'a ResourcePool> {
    if namespace.is_terminating() {
        return Vec::new();
    }
    let mut out: Vec<_> = pools
        .iter()
        .filter(|p| !p.metadata.is_deleting())
        .filter(|p| matches_any(&p.spec.selectors, &namespace.metadata.labels))
        .collect();
    out.sort_by(|a, b| a.name().cmp(b.name()));
    out
}
