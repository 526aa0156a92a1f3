use pkg_constants::pool::RELEASE_ANNOTATION;
use pkg_constants::state::{
    NAMESPACES_PREFIX, RESOURCE_POOL_CLAIMS_PREFIX, RESOURCE_POOLS_PREFIX,
};
use pkg_metrics::PoolRecorder;
use pkg_metrics::pool::{CLAIM_RECONCILE_ERRORS, CLAIM_RECONCILES};
use pkg_pool::membership;
use pkg_pool::status::{is_unassigned, mark_assigned, mark_assignment_failed, mark_unassigned};
use pkg_state::{EventType, StateStore, WatchEvent};
use pkg_types::claim::ResourcePoolClaim;
use pkg_types::namespace::Namespace;
use pkg_types::pool::ResourcePool;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::ControllerConfig;
use crate::queue::{KeyedLock, WorkQueue};

/// Resolves each claim's `spec.pool` to a pool and records the result in
/// the claim's Assigned and Ready conditions. Binding itself is left to the
/// pool controller.
pub struct ClaimController {
    store: StateStore,
    metrics: PoolRecorder,
    config: ControllerConfig,
    queue: WorkQueue,
    locks: KeyedLock,
}

impl ClaimController {
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
                "ClaimController started (workers={}, resync={}s)",
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
                    _ = resync.tick() => {
                        if let Err(e) = this.enqueue_all().await {
                            warn!("ClaimController resync error: {}", e);
                        }
                    }
                    event = events.recv() => match event {
                        Ok(event) => {
                            if let Err(e) = this.handle_event(&event).await {
                                warn!("ClaimController event error: {}", e);
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("ClaimController watch lagged by {} events, resyncing", n);
                            if let Err(e) = this.enqueue_all().await {
                                warn!("ClaimController resync error: {}", e);
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let key = self.queue.pop().await;
            self.metrics.registry().counter_inc(CLAIM_RECONCILES);
            if let Err(e) = self.reconcile(&key).await {
                self.metrics.registry().counter_inc(CLAIM_RECONCILE_ERRORS);
                warn!("ClaimController reconcile {} error: {}", key, e);
            }
        }
    }

    async fn enqueue_all(&self) -> anyhow::Result<()> {
        for (key, _) in self.store.list_prefix(RESOURCE_POOL_CLAIMS_PREFIX).await? {
            if let Some(k) = key.strip_prefix(RESOURCE_POOL_CLAIMS_PREFIX) {
                self.queue.add(k);
            }
        }
        Ok(())
    }

    /// Claims react to their own changes, to pools coming and going, and to
    /// label changes on their namespace.
    async fn handle_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        if let Some(k) = event.key.strip_prefix(RESOURCE_POOL_CLAIMS_PREFIX) {
            if event.event_type == EventType::Put {
                self.queue.add(k);
            }
        } else if let Some(name) = event.key.strip_prefix(NAMESPACES_PREFIX) {
            let prefix = format!("{}{}/", RESOURCE_POOL_CLAIMS_PREFIX, name);
            for (key, _) in self.store.list_prefix(&prefix).await? {
                if let Some(k) = key.strip_prefix(RESOURCE_POOL_CLAIMS_PREFIX) {
                    self.queue.add(k);
                }
            }
        } else if let Some(pool) = event.key.strip_prefix(RESOURCE_POOLS_PREFIX) {
            let claims: Vec<ResourcePoolClaim> =
                self.store.list_objects(RESOURCE_POOL_CLAIMS_PREFIX).await?;
            for claim in claims
                .iter()
                .filter(|c| c.spec.pool == pool || c.status.pool.name == pool)
            {
                self.queue.add(claim.full_name());
            }
        }
        Ok(())
    }

    /// One pass for the claim at `<namespace>/<name>`.
    pub async fn reconcile(&self, key: &str) -> anyhow::Result<()> {
        let Some((namespace, name)) = key.split_once('/') else {
            return Ok(());
        };
        let _guard = self.locks.lock(key).await;
        let store_key = ResourcePoolClaim::key_for(namespace, name);
        let Some(claim) = self.store.get_object::<ResourcePoolClaim>(&store_key).await? else {
            return Ok(());
        };
        if claim.metadata.is_deleting() {
            return Ok(());
        }
        if claim.is_released() {
            return self.release(key, &store_key).await;
        }

        let pool = if claim.spec.pool.is_empty() {
            None
        } else {
            self.store
                .get_object::<ResourcePool>(&ResourcePool::key_for(&claim.spec.pool))
                .await?
        };
        let ns = self
            .store
            .get_object::<Namespace>(&Namespace::key_for(namespace))
            .await?;

        let result = assignment(&claim, pool.as_ref(), ns.as_ref());
        match &result {
            Ok(pool) => debug!("Claim {}: assigned to pool {}", key, pool.name()),
            Err(msg) => debug!("Claim {}: not assignable: {}", key, msg),
        }
        // A claim left behind by a deleted pool or a release keeps its
        // Unassigned state until it names a pool that exists.
        let pool_gone = pool.as_ref().is_none_or(|p| p.metadata.is_deleting());
        self.store
            .update_with_retry::<ResourcePoolClaim, _>(&store_key, self.config.status_retries, |c| {
                match &result {
                    Ok(pool) => mark_assigned(&mut c.status, pool),
                    Err(_) if pool_gone && is_unassigned(&c.status) => false,
                    Err(msg) => mark_assignment_failed(&mut c.status, msg),
                }
            })
            .await?;
        Ok(())
    }

    /// Detach a claim carrying the release annotation. A bound claim is
    /// first unbound by its pool controller; this only finishes the job
    /// once Bound is False, clearing the pool reference and the annotation.
    async fn release(&self, key: &str, store_key: &str) -> anyhow::Result<()> {
        let mut released_from = String::new();
        self.store
            .update_with_retry::<ResourcePoolClaim, _>(store_key, self.config.status_retries, |c| {
                released_from.clear();
                if !c.is_released() || c.is_bound() {
                    return false;
                }
                released_from = if c.is_assigned() {
                    c.status.pool.name.clone()
                } else {
                    c.spec.pool.clone()
                };
                c.spec.pool.clear();
                c.metadata.annotations.remove(RELEASE_ANNOTATION);
                mark_unassigned(
                    &mut c.status,
                    &format!("claim released from pool {}", released_from),
                );
                true
            })
            .await?;
        if released_from.is_empty() {
            debug!("Claim {}: release waiting for pool to unbind", key);
        } else {
            info!("Claim {}: released from pool {}", key, released_from);
        }
        Ok(())
    }
}

/// Decide whether `claim` may be assigned to `pool`. The error is the
/// message recorded on the Assigned condition.
pub fn assignment<'a>(
    claim: &ResourcePoolClaim,
    pool: Option<&'a ResourcePool>,
    namespace: Option<&Namespace>,
) -> Result<&'a ResourcePool, String> {
    if claim.spec.pool.is_empty() {
        return Err("no pool reference was defined".to_string());
    }
    let Some(pool) = pool.filter(|p| !p.metadata.is_deleting()) else {
        return Err("resourcepool not available".to_string());
    };
    if claim.is_bound() && claim.status.pool.uid != pool.uid() {
        return Err(format!(
            "can not change pool while claim is in use for pool {}",
            claim.status.pool.name
        ));
    }
    let member = namespace
        .map(|ns| !membership::resolve_for_pool(pool, std::slice::from_ref(ns)).is_empty())
        .unwrap_or(false);
    if !member {
        return Err("resourcepool not available".to_string());
    }
    if let Some(missing) = claim
        .spec
        .resource_claims
        .keys()
        .find(|r| !pool.spec.quota.hard.contains_key(*r))
    {
        return Err(format!(
            "resource {} is not available in pool {}",
            missing,
            pool.name()
        ));
    }
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::pool::FAILED_REASON;
    use pkg_metrics::MetricsRegistry;
    use pkg_types::ResourceList;
    use pkg_types::claim::PoolReference;
    use pkg_types::condition::{Condition, ConditionType};
    use pkg_types::quantity::resource_list;
    use pkg_types::selector::LabelSelector;

    fn rl(pairs: &[(&str, &str)]) -> ResourceList {
        resource_list(pairs.iter().copied()).unwrap()
    }

    fn make_pool() -> ResourcePool {
        let mut pool = ResourcePool::new("gold", rl(&[("limits.cpu", "4")]));
        pool.metadata.uid = "gold-uid".into();
        pool.spec.selectors = vec![LabelSelector::from_labels([("tier", "gold")])];
        pool
    }

    fn make_claim(pool: &str, req: &[(&str, &str)]) -> ResourcePoolClaim {
        ResourcePoolClaim::new("team-a", "c", pool, rl(req))
    }

    #[test]
    fn assignment_failures() {
        let pool = make_pool();
        let member = Namespace::new("team-a").with_label("tier", "gold");
        let outsider = Namespace::new("team-a");

        let claim = make_claim("", &[("limits.cpu", "1")]);
        assert_eq!(
            assignment(&claim, None, Some(&member)).unwrap_err(),
            "no pool reference was defined"
        );

        let claim = make_claim("gold", &[("limits.cpu", "1")]);
        assert_eq!(
            assignment(&claim, None, Some(&member)).unwrap_err(),
            "resourcepool not available"
        );
        assert_eq!(
            assignment(&claim, Some(&pool), Some(&outsider)).unwrap_err(),
            "resourcepool not available"
        );
        assert_eq!(
            assignment(&claim, Some(&pool), None).unwrap_err(),
            "resourcepool not available"
        );

        let mut deleting = pool.clone();
        deleting.metadata.deletion_timestamp = Some(chrono::Utc::now());
        assert_eq!(
            assignment(&claim, Some(&deleting), Some(&member)).unwrap_err(),
            "resourcepool not available"
        );

        let claim = make_claim("gold", &[("limits.memory", "1Gi")]);
        assert_eq!(
            assignment(&claim, Some(&pool), Some(&member)).unwrap_err(),
            "resource limits.memory is not available in pool gold"
        );
    }

    #[test]
    fn bound_claim_cannot_move() {
        let pool = make_pool();
        let member = Namespace::new("team-a").with_label("tier", "gold");
        let mut claim = make_claim("gold", &[("limits.cpu", "1")]);
        claim.status.pool = PoolReference {
            name: "silver".into(),
            uid: "silver-uid".into(),
        };
        claim
            .status
            .conditions
            .update(Condition::new(ConditionType::Bound, true, "InUse", ""));
        assert_eq!(
            assignment(&claim, Some(&pool), Some(&member)).unwrap_err(),
            "can not change pool while claim is in use for pool silver"
        );

        claim.status.pool.uid = "gold-uid".into();
        assert!(assignment(&claim, Some(&pool), Some(&member)).is_ok());
    }

    async fn setup() -> (StateStore, ClaimController) {
        let store = StateStore::in_memory().await.unwrap();
        let recorder = PoolRecorder::new(Arc::new(MetricsRegistry::new()));
        let controller = ClaimController::new(store.clone(), recorder, ControllerConfig::default());
        (store, controller)
    }

    #[tokio::test]
    async fn reconcile_assigns_and_fails() {
        let (store, controller) = setup().await;
        store
            .create(Namespace::new("team-a").with_label("tier", "gold"))
            .await
            .unwrap();
        let mut pool = make_pool();
        pool.metadata.uid.clear();
        let pool = store.create(pool).await.unwrap();
        store
            .create(make_claim("gold", &[("limits.cpu", "1")]))
            .await
            .unwrap();

        controller.reconcile("team-a/c").await.unwrap();
        let key = ResourcePoolClaim::key_for("team-a", "c");
        let claim: ResourcePoolClaim = store.get_object(&key).await.unwrap().unwrap();
        assert_eq!(claim.status.pool.uid, pool.uid());
        assert!(claim.status.conditions.is_true(ConditionType::Assigned));
        assert!(claim.status.conditions.is_true(ConditionType::Ready));

        // Unchanged pass writes nothing.
        let seq = store.event_log.current_seq().await;
        controller.reconcile("team-a/c").await.unwrap();
        assert_eq!(store.event_log.current_seq().await, seq);

        // Point it at a pool that does not exist.
        store
            .update_with_retry::<ResourcePoolClaim, _>(&key, 5, |c| {
                c.spec.pool = "missing".into();
                true
            })
            .await
            .unwrap();
        controller.reconcile("team-a/c").await.unwrap();
        let claim: ResourcePoolClaim = store.get_object(&key).await.unwrap().unwrap();
        assert!(claim.status.pool.is_empty());
        let assigned = claim.status.conditions.get(ConditionType::Assigned).unwrap();
        assert!(!assigned.is_true());
        assert_eq!(assigned.reason, FAILED_REASON);
        assert_eq!(assigned.message, "resourcepool not available");
    }

    #[tokio::test]
    async fn missing_claim_is_a_noop() {
        let (_store, controller) = setup().await;
        controller.reconcile("team-a/none").await.unwrap();
        controller.reconcile("malformed").await.unwrap();
    }
}
