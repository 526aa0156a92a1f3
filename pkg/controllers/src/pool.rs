use pkg_constants::pool::{POOL_FINALIZER, POOL_LABEL};
use pkg_constants::state::{
    NAMESPACES_PREFIX, RESOURCE_POOL_CLAIMS_PREFIX, RESOURCE_POOLS_PREFIX, RESOURCE_QUOTAS_PREFIX,
};
use pkg_metrics::PoolRecorder;
use pkg_metrics::pool::{POOL_RECONCILE_ERRORS, POOL_RECONCILES};
use pkg_pool::status::{
    FinalizerAction, apply_decision, apply_pool_status, finalizer_action, mark_unassigned,
};
use pkg_pool::{bind, membership, projector};
use pkg_state::{StateStore, WatchEvent};
use pkg_types::Object;
use pkg_types::claim::ResourcePoolClaim;
use pkg_types::namespace::Namespace;
use pkg_types::pool::ResourcePool;
use pkg_types::quota::ResourceQuota;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::ControllerConfig;
use crate::projection;
use crate::queue::{KeyedLock, WorkQueue};

/// Controller that reconciles ResourcePools: resolves membership, binds
/// claims against the pool's hard quota, projects per-namespace quota
/// objects and reports status. Also drives two-phase pool deletion.
pub struct PoolController {
    store: StateStore,
    metrics: PoolRecorder,
    config: ControllerConfig,
    queue: WorkQueue,
    locks: KeyedLock,
}

impl PoolController {
    pub fn new(store: StateStore, metrics: PoolRecorder, config: ControllerConfig) -> Self {
        Self {
            store,
            metrics,
            config,
            queue: WorkQueue::new(),
            locks: KeyedLock::new(),
        }
    }

    /// Start the watch loop, the resync timer and the workers.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let this = Arc::new(self);
        tokio::spawn(async move {
            info!(
                "PoolController started (workers={}, resync={}s)",
                this.config.workers,
                this.config.resync_interval.as_secs()
            );
            let mut events = this.store.event_log.subscribe();
            for _ in 0..this.config.workers.max(1) {
                let worker = this.clone();
                tokio::spawn(async move { worker.run_worker().await });
            }
            let mut resync = tokio::time::interval(this.config.resync_interval);
            loop {
                tokio::select! {
                    _ = resync.tick() => this.resync().await,
                    event = events.recv() => match event {
                        Ok(event) => {
                            if let Err(e) = this.handle_event(&event).await {
                                warn!("PoolController event error: {}", e);
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("PoolController watch lagged by {} events, resyncing", n);
                            this.resync().await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let name = self.queue.pop().await;
            self.metrics.registry().counter_inc(POOL_RECONCILES);
            if let Err(e) = self.reconcile(&name).await {
                self.metrics.registry().counter_inc(POOL_RECONCILE_ERRORS);
                warn!("PoolController reconcile {} error: {}", name, e);
            }
        }
    }

    async fn resync(&self) {
        if let Err(e) = self.enqueue_all().await {
            warn!("PoolController resync error: {}", e);
        }
        match projection::collect_garbage(&self.store).await {
            Ok(0) => {}
            Ok(n) => info!("PoolController collected {} orphaned quotas", n),
            Err(e) => warn!("PoolController garbage collection error: {}", e),
        }
    }

    async fn enqueue_all(&self) -> anyhow::Result<()> {
        for (key, _) in self.store.list_prefix(RESOURCE_POOLS_PREFIX).await? {
            if let Some(name) = key.strip_prefix(RESOURCE_POOLS_PREFIX) {
                self.queue.add(name);
            }
        }
        Ok(())
    }

    /// Map a store event to the pools it may affect.
    async fn handle_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        if let Some(name) = event.key.strip_prefix(RESOURCE_POOLS_PREFIX) {
            self.queue.add(name);
        } else if event.key.starts_with(NAMESPACES_PREFIX) {
            // Any label change may move the namespace in or out of a pool.
            self.enqueue_all().await?;
        } else if event.key.starts_with(RESOURCE_POOL_CLAIMS_PREFIX) {
            let Some(value) = &event.value else {
                return Ok(());
            };
            if let Ok(claim) = serde_json::from_value::<ResourcePoolClaim>(value.clone()) {
                for name in [&claim.spec.pool, &claim.status.pool.name] {
                    if !name.is_empty() {
                        self.queue.add(name.as_str());
                    }
                }
            }
        } else if event.key.starts_with(RESOURCE_QUOTAS_PREFIX) {
            // Drift on a projected quota is repaired by the owning pool.
            let Some(value) = &event.value else {
                return Ok(());
            };
            if let Ok(quota) = serde_json::from_value::<ResourceQuota>(value.clone())
                && let Some(pool) = quota.metadata.labels.get(POOL_LABEL)
            {
                self.queue.add(pool.as_str());
            }
        }
        Ok(())
    }

    /// One pass for the pool `name`.
    pub async fn reconcile(&self, name: &str) -> anyhow::Result<()> {
        let _guard = self.locks.lock(name).await;
        let key = ResourcePool::key_for(name);
        let Some(pool) = self.store.get_object::<ResourcePool>(&key).await? else {
            self.metrics.forget(name);
            let removed = projection::collect_garbage(&self.store).await?;
            if removed > 0 {
                info!("ResourcePool {}: gone, collected {} quotas", name, removed);
            }
            return Ok(());
        };
        if pool.metadata.is_deleting() {
            return self.finalize(pool).await;
        }

        let retries = self.config.status_retries;
        let namespaces: Vec<Namespace> = self.store.list_objects(NAMESPACES_PREFIX).await?;
        let claims: Vec<ResourcePoolClaim> =
            self.store.list_objects(RESOURCE_POOL_CLAIMS_PREFIX).await?;

        let members = membership::resolve_for_pool(&pool, &namespaces);
        let plan = bind(&pool, &members, &claims);

        let projections = projector::render(&pool, &plan, &members);
        let writes = projection::sync(&self.store, &pool, &projections, retries).await?;
        if writes > 0 {
            debug!("ResourcePool {}: {} quota writes", name, writes);
        }

        for decision in &plan.decisions {
            let claim_key = ResourcePoolClaim::key_for(&decision.namespace, &decision.name);
            let mut changed = false;
            self.store
                .update_with_retry::<ResourcePoolClaim, _>(&claim_key, retries, |c| {
                    // Replaced or reassigned since the listing.
                    if c.uid() != decision.uid || !c.is_assigned_to(pool.uid()) {
                        return false;
                    }
                    changed = apply_decision(&mut c.status, decision);
                    changed
                })
                .await?;
            if changed && decision.is_bound() {
                info!(
                    "ResourcePool {}: bound claim {}/{}",
                    name, decision.namespace, decision.name
                );
            } else if changed {
                debug!(
                    "ResourcePool {}: claim {}/{} not bound: {:?}",
                    name, decision.namespace, decision.name, decision.outcome
                );
            }
        }

        let bound = plan.bound_count();
        let updated = self
            .store
            .update_with_retry::<ResourcePool, _>(&key, retries, |p| {
                if p.uid() != pool.uid() || p.metadata.is_deleting() {
                    return false;
                }
                let mut changed = apply_pool_status(&mut p.status, &members, &plan);
                changed |= match finalizer_action(p, bound) {
                    FinalizerAction::Add => p.metadata.add_finalizer(POOL_FINALIZER),
                    FinalizerAction::Remove => p.metadata.remove_finalizer(POOL_FINALIZER),
                    FinalizerAction::Keep => false,
                };
                changed
            })
            .await?;
        if let Some(updated) = updated {
            self.metrics.record(&updated);
        }
        Ok(())
    }

    /// Second phase of a pool delete: cascade or orphan, then drop the
    /// finalizer so the store removes the pool.
    async fn finalize(&self, pool: ResourcePool) -> anyhow::Result<()> {
        let retries = self.config.status_retries;
        let cascade = pool.spec.config.delete_bound_resources();
        let claims: Vec<ResourcePoolClaim> =
            self.store.list_objects(RESOURCE_POOL_CLAIMS_PREFIX).await?;

        let message = format!("pool {} was deleted", pool.name());
        for claim in claims.iter().filter(|c| c.is_assigned_to(pool.uid())) {
            if cascade && claim.is_bound() {
                self.store
                    .delete_object::<ResourcePoolClaim>(&claim.key())
                    .await?;
                info!(
                    "ResourcePool {}: deleted bound claim {}",
                    pool.name(),
                    claim.full_name()
                );
                continue;
            }
            self.store
                .update_with_retry::<ResourcePoolClaim, _>(&claim.key(), retries, |c| {
                    c.is_assigned_to(pool.uid()) && mark_unassigned(&mut c.status, &message)
                })
                .await?;
            debug!(
                "ResourcePool {}: released claim {}",
                pool.name(),
                claim.full_name()
            );
        }

        let quotas = if cascade {
            projection::delete_owned(&self.store, pool.uid()).await?
        } else {
            projection::orphan_owned(&self.store, pool.uid(), retries).await?
        };

        self.store
            .update_with_retry::<ResourcePool, _>(&pool.key(), retries, |p| {
                p.uid() == pool.uid() && p.metadata.remove_finalizer(POOL_FINALIZER)
            })
            .await?;
        self.metrics.forget(pool.name());
        info!(
            "ResourcePool {}: finalized ({}, {} quotas)",
            pool.name(),
            if cascade { "cascade" } else { "orphan" },
            quotas
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClaimController;
    use pkg_constants::pool::{RELEASE_ANNOTATION, RELEASE_ANNOTATION_TRIGGER, UNASSIGNED_REASON};
    use pkg_metrics::MetricsRegistry;
    use pkg_metrics::pool::POOL_CLAIMS;
    use pkg_state::DeleteOutcome;
    use pkg_types::{Quantity, ResourceList};
    use pkg_types::condition::ConditionType;
    use pkg_types::quantity::resource_list;
    use pkg_types::selector::LabelSelector;

    fn rl(pairs: &[(&str, &str)]) -> ResourceList {
        resource_list(pairs.iter().copied()).unwrap()
    }

    struct Harness {
        store: StateStore,
        pools: PoolController,
        claims: ClaimController,
        recorder: PoolRecorder,
    }

    impl Harness {
        async fn new() -> Self {
            let store = StateStore::in_memory().await.unwrap();
            let recorder = PoolRecorder::new(Arc::new(MetricsRegistry::new()));
            let config = ControllerConfig::default();
            Self {
                pools: PoolController::new(store.clone(), recorder.clone(), config.clone()),
                claims: ClaimController::new(store.clone(), recorder.clone(), config),
                store,
                recorder,
            }
        }

        /// Run claim and pool passes until nothing changes.
        async fn settle(&self) {
            for _ in 0..4 {
                let claims: Vec<ResourcePoolClaim> = self
                    .store
                    .list_objects(RESOURCE_POOL_CLAIMS_PREFIX)
                    .await
                    .unwrap();
                for claim in &claims {
                    self.claims.reconcile(&claim.full_name()).await.unwrap();
                }
                let pools: Vec<ResourcePool> =
                    self.store.list_objects(RESOURCE_POOLS_PREFIX).await.unwrap();
                for pool in &pools {
                    self.pools.reconcile(pool.name()).await.unwrap();
                }
            }
        }

        async fn claim(&self, ns: &str, name: &str) -> Option<ResourcePoolClaim> {
            self.store
                .get_object(&ResourcePoolClaim::key_for(ns, name))
                .await
                .unwrap()
        }

        async fn pool(&self, name: &str) -> Option<ResourcePool> {
            self.store
                .get_object(&ResourcePool::key_for(name))
                .await
                .unwrap()
        }

        async fn quota(&self, ns: &str, pool: &str) -> Option<ResourceQuota> {
            self.store
                .get_object(&ResourceQuota::key_for(ns, &format!("quotapool-{}", pool)))
                .await
                .unwrap()
        }
    }

    /// Namespaces a and b in tier gold, pool gold with 2 CPUs, three 1-CPU
    /// claims created in order a/c1, b/c2, a/c3.
    async fn gold_fixture() -> Harness {
        let h = Harness::new().await;
        for ns in ["a", "b"] {
            h.store
                .create(Namespace::new(ns).with_label("tier", "gold"))
                .await
                .unwrap();
        }
        let mut pool = ResourcePool::new("gold", rl(&[("limits.cpu", "2")]));
        pool.spec.selectors = vec![LabelSelector::from_labels([("tier", "gold")])];
        h.store.create(pool).await.unwrap();
        for (ns, name) in [("a", "c1"), ("b", "c2"), ("a", "c3")] {
            h.store
                .create(ResourcePoolClaim::new(ns, name, "gold", rl(&[("limits.cpu", "1")])))
                .await
                .unwrap();
        }
        h.settle().await;
        h
    }

    #[tokio::test]
    async fn binds_projects_and_reports() {
        let h = gold_fixture().await;

        assert!(h.claim("a", "c1").await.unwrap().is_bound());
        assert!(h.claim("b", "c2").await.unwrap().is_bound());
        let c3 = h.claim("a", "c3").await.unwrap();
        assert!(!c3.is_bound());
        let exhausted = c3.status.conditions.get(ConditionType::Exhausted).unwrap();
        assert!(exhausted.is_true());
        assert_eq!(exhausted.message, "requested: limits.cpu=1, available: limits.cpu=0");

        assert_eq!(h.quota("a", "gold").await.unwrap().spec.hard, rl(&[("limits.cpu", "1")]));
        assert_eq!(h.quota("b", "gold").await.unwrap().spec.hard, rl(&[("limits.cpu", "1")]));

        let pool = h.pool("gold").await.unwrap();
        assert_eq!(pool.status.namespaces, vec!["a", "b"]);
        assert_eq!(pool.status.claim_size, 2);
        assert_eq!(pool.status.allocation.claimed, rl(&[("limits.cpu", "2")]));
        assert_eq!(
            pool.status.exhaustions["limits.cpu"].requesting,
            Quantity::from_units(1)
        );
        assert!(pool.metadata.has_finalizer(POOL_FINALIZER));
        assert_eq!(
            h.recorder.registry().family_get(POOL_CLAIMS, &["gold"]),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn settled_state_is_a_fixed_point() {
        let h = gold_fixture().await;
        let seq = h.store.event_log.current_seq().await;
        h.settle().await;
        assert_eq!(h.store.event_log.current_seq().await, seq);
    }

    #[tokio::test]
    async fn namespace_leaving_releases_its_claims() {
        let h = gold_fixture().await;
        h.store
            .update_with_retry::<Namespace, _>(&Namespace::key_for("b"), 5, |ns| {
                ns.metadata.labels.remove("tier").is_some()
            })
            .await
            .unwrap();
        h.settle().await;

        let c2 = h.claim("b", "c2").await.unwrap();
        assert!(!c2.is_bound());
        assert!(c2.status.pool.is_empty());
        assert!(h.quota("b", "gold").await.is_none());

        // The freed CPU goes to the queued claim.
        assert!(h.claim("a", "c3").await.unwrap().is_bound());
        assert_eq!(h.quota("a", "gold").await.unwrap().spec.hard, rl(&[("limits.cpu", "2")]));
        let pool = h.pool("gold").await.unwrap();
        assert_eq!(pool.status.namespaces, vec!["a"]);
        assert!(pool.status.exhaustions.is_empty());
    }

    #[tokio::test]
    async fn cascade_delete_removes_bound_claims_and_quotas() {
        let h = gold_fixture().await;
        h.store
            .update_with_retry::<ResourcePool, _>(&ResourcePool::key_for("gold"), 5, |p| {
                p.spec.config.delete_bound_resources = Some(true);
                true
            })
            .await
            .unwrap();

        let outcome = h
            .store
            .request_delete::<ResourcePool>(&ResourcePool::key_for("gold"))
            .await
            .unwrap();
        assert!(matches!(outcome, DeleteOutcome::Marked(_)));
        h.pools.reconcile("gold").await.unwrap();

        assert!(h.pool("gold").await.is_none());
        assert!(h.claim("a", "c1").await.is_none());
        assert!(h.claim("b", "c2").await.is_none());
        // Never bound, so only released.
        let c3 = h.claim("a", "c3").await.unwrap();
        assert!(c3.status.pool.is_empty());
        assert!(h.quota("a", "gold").await.is_none());
        assert!(h.quota("b", "gold").await.is_none());
    }

    #[tokio::test]
    async fn orphan_delete_releases_claims_and_keeps_quotas() {
        let h = gold_fixture().await;
        h.store
            .request_delete::<ResourcePool>(&ResourcePool::key_for("gold"))
            .await
            .unwrap();
        h.pools.reconcile("gold").await.unwrap();

        assert!(h.pool("gold").await.is_none());
        let c1 = h.claim("a", "c1").await.unwrap();
        assert!(c1.status.pool.is_empty());
        let bound = c1.status.conditions.get(ConditionType::Bound).unwrap();
        assert!(!bound.is_true());
        assert_eq!(bound.reason, UNASSIGNED_REASON);

        let quota = h.quota("a", "gold").await.unwrap();
        assert!(quota.metadata.owner_references.is_empty());
        assert_eq!(quota.spec.hard, rl(&[("limits.cpu", "1")]));

        // The orphaned quota survives garbage collection, and the claims
        // stay Unassigned rather than failing assignment.
        h.settle().await;
        assert!(h.quota("a", "gold").await.is_some());
        for (ns, name) in [("a", "c1"), ("b", "c2"), ("a", "c3")] {
            let claim = h.claim(ns, name).await.unwrap();
            let assigned = claim.status.conditions.get(ConditionType::Assigned).unwrap();
            assert!(!assigned.is_true());
            assert_eq!(assigned.reason, UNASSIGNED_REASON);
            assert_eq!(assigned.message, "pool gold was deleted");
        }
    }

    #[tokio::test]
    async fn raising_hard_binds_queued_claims() {
        let h = gold_fixture().await;
        h.store
            .update_with_retry::<ResourcePool, _>(&ResourcePool::key_for("gold"), 5, |p| {
                p.spec.quota.hard = rl(&[("limits.cpu", "3")]);
                true
            })
            .await
            .unwrap();
        h.settle().await;

        let c3 = h.claim("a", "c3").await.unwrap();
        assert!(c3.is_bound());
        assert!(!c3.status.conditions.is_true(ConditionType::Exhausted));
        let pool = h.pool("gold").await.unwrap();
        assert_eq!(pool.status.claim_size, 3);
        assert_eq!(pool.status.allocation.claimed, rl(&[("limits.cpu", "3")]));
        assert!(pool.status.allocation.available["limits.cpu"].is_zero());
        assert!(pool.status.exhaustions.is_empty());
        assert_eq!(h.quota("a", "gold").await.unwrap().spec.hard, rl(&[("limits.cpu", "2")]));
    }

    #[tokio::test]
    async fn release_annotation_unbinds_and_detaches() {
        let h = gold_fixture().await;
        h.store
            .update_with_retry::<ResourcePoolClaim, _>(
                &ResourcePoolClaim::key_for("a", "c1"),
                5,
                |c| {
                    c.metadata.annotations.insert(
                        RELEASE_ANNOTATION.into(),
                        RELEASE_ANNOTATION_TRIGGER.into(),
                    );
                    true
                },
            )
            .await
            .unwrap();
        h.settle().await;

        let c1 = h.claim("a", "c1").await.unwrap();
        assert!(!c1.is_bound());
        assert!(!c1.is_assigned());
        assert!(c1.spec.pool.is_empty());
        assert!(!c1.metadata.annotations.contains_key(RELEASE_ANNOTATION));
        let assigned = c1.status.conditions.get(ConditionType::Assigned).unwrap();
        assert_eq!(assigned.reason, UNASSIGNED_REASON);
        assert_eq!(assigned.message, "claim released from pool gold");

        // The freed CPU goes to the queued claim.
        assert!(h.claim("a", "c3").await.unwrap().is_bound());
        let pool = h.pool("gold").await.unwrap();
        assert_eq!(pool.status.claim_size, 2);
        assert!(
            pool.status.claims["a"]
                .iter()
                .all(|entry| entry.name != "c1")
        );
    }

    #[tokio::test]
    async fn vanished_pool_quotas_are_collected() {
        let h = gold_fixture().await;
        // Bypass the finalizer.
        h.store
            .delete_object::<ResourcePool>(&ResourcePool::key_for("gold"))
            .await
            .unwrap();
        h.pools.reconcile("gold").await.unwrap();
        assert!(h.quota("a", "gold").await.is_none());
        assert!(h.quota("b", "gold").await.is_none());
        assert_eq!(h.recorder.registry().family_get(POOL_CLAIMS, &["gold"]), None);
    }

    #[tokio::test]
    async fn quota_drift_is_repaired() {
        let h = gold_fixture().await;
        let key = ResourceQuota::key_for("a", "quotapool-gold");
        h.store
            .update_with_retry::<ResourceQuota, _>(&key, 5, |q| {
                q.spec.hard = rl(&[("limits.cpu", "100")]);
                true
            })
            .await
            .unwrap();
        h.pools.reconcile("gold").await.unwrap();
        assert_eq!(h.quota("a", "gold").await.unwrap().spec.hard, rl(&[("limits.cpu", "1")]));
    }

    #[tokio::test]
    async fn events_map_to_pools() {
        let h = gold_fixture().await;
        while h.pools.queue.try_pop().is_some() {}

        let claim = h.claim("a", "c1").await.unwrap();
        let event = WatchEvent {
            seq: 1,
            event_type: pkg_state::EventType::Delete,
            key: claim.key(),
            value: Some(serde_json::to_value(&claim).unwrap()),
        };
        h.pools.handle_event(&event).await.unwrap();
        assert_eq!(h.pools.queue.try_pop().as_deref(), Some("gold"));
        assert!(h.pools.queue.is_empty());

        let event = WatchEvent {
            seq: 2,
            event_type: pkg_state::EventType::Put,
            key: Namespace::key_for("z"),
            value: None,
        };
        h.pools.handle_event(&event).await.unwrap();
        assert_eq!(h.pools.queue.len(), 1);
    }
}
