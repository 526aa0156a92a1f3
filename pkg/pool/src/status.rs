//! Pool and claim status rendering from a binder pass.
//!
//! Every function here returns whether it changed anything so the caller
//! can skip writes that would only retrigger reconciliation.

use pkg_constants::pool::{
    FAILED_REASON, IN_USE_REASON, POOL_EXHAUSTED_REASON, POOL_FINALIZER, QUEUE_EXHAUSTED_REASON,
    SUCCEEDED_REASON, UNASSIGNED_REASON, UNUSED_REASON,
};
use pkg_types::claim::{PoolReference, ResourcePoolClaimStatus};
use pkg_types::condition::{Condition, ConditionStatus, ConditionType};
use pkg_types::pool::{ResourcePool, ResourcePoolStatus};

use crate::binder::{BindingPlan, ClaimDecision, Outcome};

/// Write namespaces, counts, ledger entries, allocation, exhaustions and
/// the Ready condition.
pub fn apply_pool_status(
    status: &mut ResourcePoolStatus,
    members: &[String],
    plan: &BindingPlan,
) -> bool {
    let mut next = status.clone();
    next.namespaces = members.to_vec();
    next.namespace_size = members.len();
    next.claim_size = plan.bound_count();
    next.claims = plan.bound_by_namespace();
    next.allocation = plan.ledger.allocation();
    next.exhaustions = plan.exhaustions.clone();
    next.conditions.update(Condition::new(
        ConditionType::Ready,
        true,
        SUCCEEDED_REASON,
        "reconciled",
    ));

    if pool_status_equal(status, &next) {
        return false;
    }
    *status = next;
    true
}

// Condition timestamps are ignored; `ConditionList::update` already keeps
// them stable across identical passes.
fn pool_status_equal(a: &ResourcePoolStatus, b: &ResourcePoolStatus) -> bool {
    a.namespaces == b.namespaces
        && a.namespace_size == b.namespace_size
        && a.claim_size == b.claim_size
        && a.claims == b.claims
        && a.allocation == b.allocation
        && a.exhaustions == b.exhaustions
        && a.conditions.len() == b.conditions.len()
        && a
            .conditions
            .iter()
            .zip(b.conditions.iter())
            .all(|(x, y)| x.same_state(y))
}

/// Bound and Exhausted conditions for a binder decision.
pub fn decision_conditions(decision: &ClaimDecision) -> [Condition; 2] {
    match &decision.outcome {
        Outcome::Bound => {
            let reason = if decision.is_unused() {
                UNUSED_REASON
            } else {
                IN_USE_REASON
            };
            [
                Condition::new(ConditionType::Bound, true, reason, "Claimed resources"),
                Condition::new(ConditionType::Exhausted, false, SUCCEEDED_REASON, ""),
            ]
        }
        Outcome::PoolExhausted { message } => [
            Condition::new(ConditionType::Bound, false, POOL_EXHAUSTED_REASON, message.clone()),
            Condition::new(ConditionType::Exhausted, true, POOL_EXHAUSTED_REASON, message.clone()),
        ],
        Outcome::QueueExhausted { message } => [
            Condition::new(ConditionType::Bound, false, QUEUE_EXHAUSTED_REASON, message.clone()),
            Condition::new(ConditionType::Exhausted, true, QUEUE_EXHAUSTED_REASON, message.clone()),
        ],
        Outcome::Released { reason, message } => [
            Condition::new(ConditionType::Bound, false, reason, message.clone()),
            Condition::new(ConditionType::Exhausted, false, reason, message.clone()),
        ],
    }
}

pub fn apply_decision(status: &mut ResourcePoolClaimStatus, decision: &ClaimDecision) -> bool {
    let mut changed = false;
    for cond in decision_conditions(decision) {
        changed |= status.conditions.update(cond);
    }
    changed |= refresh_primary(status);
    changed
}

/// Claim resolved to `pool`: record the reference, Assigned and Ready.
pub fn mark_assigned(status: &mut ResourcePoolClaimStatus, pool: &ResourcePool) -> bool {
    let target = PoolReference {
        name: pool.name().to_string(),
        uid: pool.uid().to_string(),
    };
    let mut changed = false;
    if status.pool != target {
        status.pool = target;
        changed = true;
    }
    changed |= status.conditions.update(Condition::new(
        ConditionType::Assigned,
        true,
        SUCCEEDED_REASON,
        format!("Assigned to pool {}", pool.name()),
    ));
    changed |= status.conditions.update(Condition::new(
        ConditionType::Ready,
        true,
        SUCCEEDED_REASON,
        "reconciled",
    ));
    changed |= refresh_primary(status);
    changed
}

/// Claim could not be resolved. A claim that is not bound also loses its
/// pool reference.
pub fn mark_assignment_failed(status: &mut ResourcePoolClaimStatus, message: &str) -> bool {
    let mut changed = false;
    if !status.conditions.is_true(ConditionType::Bound) && !status.pool.is_empty() {
        status.pool = PoolReference::default();
        changed = true;
    }
    changed |= status.conditions.update(Condition::new(
        ConditionType::Assigned,
        false,
        FAILED_REASON,
        message,
    ));
    changed |= status.conditions.update(Condition::new(
        ConditionType::Ready,
        false,
        FAILED_REASON,
        message,
    ));
    changed |= refresh_primary(status);
    changed
}

/// Pool went away without cascading, or the claim was released: the
/// claim is free again.
pub fn mark_unassigned(status: &mut ResourcePoolClaimStatus, message: &str) -> bool {
    let mut changed = false;
    if !status.pool.is_empty() {
        status.pool = PoolReference::default();
        changed = true;
    }
    changed |= status.conditions.update(Condition::new(
        ConditionType::Bound,
        false,
        UNASSIGNED_REASON,
        message,
    ));
    changed |= status.conditions.remove(ConditionType::Exhausted);
    changed |= status.conditions.update(Condition::new(
        ConditionType::Assigned,
        false,
        UNASSIGNED_REASON,
        message,
    ));
    changed |= refresh_primary(status);
    changed
}

/// Left without a pool by a deleted pool or a release, and not yet
/// reassigned.
pub fn is_unassigned(status: &ResourcePoolClaimStatus) -> bool {
    status.pool.is_empty()
        && status
            .conditions
            .get(ConditionType::Assigned)
            .is_some_and(|c| !c.is_true() && c.reason == UNASSIGNED_REASON)
}

/// Primary condition: Exhausted if true, else Bound, else a failed
/// Assigned, else Ready.
pub fn primary_condition(status: &ResourcePoolClaimStatus) -> Option<Condition> {
    let conds = &status.conditions;
    conds
        .get(ConditionType::Exhausted)
        .filter(|c| c.is_true())
        .or_else(|| conds.get(ConditionType::Bound))
        .or_else(|| {
            conds
                .get(ConditionType::Assigned)
                .filter(|c| c.status == ConditionStatus::False)
        })
        .or_else(|| conds.get(ConditionType::Ready))
        .cloned()
}

fn refresh_primary(status: &mut ResourcePoolClaimStatus) -> bool {
    let next = primary_condition(status);
    let same = match (&status.condition, &next) {
        (Some(a), Some(b)) => a.same_state(b) && a.last_transition_time == b.last_transition_time,
        (None, None) => true,
        _ => false,
    };
    if same {
        return false;
    }
    status.condition = next;
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerAction {
    Add,
    Remove,
    Keep,
}

/// Finalizer held while at least one claim is bound.
pub fn finalizer_action(pool: &ResourcePool, bound: usize) -> FinalizerAction {
    let has = pool.metadata.has_finalizer(POOL_FINALIZER);
    match (bound > 0, has) {
        (true, false) => FinalizerAction::Add,
        (false, true) => FinalizerAction::Remove,
        _ => FinalizerAction::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use pkg_types::ResourceList;
    use pkg_types::quantity::resource_list;

    fn rl(pairs: &[(&str, &str)]) -> ResourceList {
        resource_list(pairs.iter().copied()).unwrap()
    }

    fn make_decision(outcome: Outcome, req: &[(&str, &str)]) -> ClaimDecision {
        ClaimDecision {
            namespace: "ns".into(),
            name: "c".into(),
            uid: "uid".into(),
            requested: rl(req),
            outcome,
        }
    }

    #[test]
    fn pool_status_reports_plan() {
        let mut pool = ResourcePool::new("p", rl(&[("limits.cpu", "2")]));
        pool.metadata.uid = "p-uid".into();
        let mut claim = pkg_types::claim::ResourcePoolClaim::new(
            "ns",
            "c",
            "p",
            rl(&[("limits.cpu", "1")]),
        );
        claim.metadata.uid = "c-uid".into();
        claim.status.pool = PoolReference {
            name: "p".into(),
            uid: "p-uid".into(),
        };
        let members = vec!["ns".to_string(), "other".to_string()];
        let plan = bind(&pool, &members, &[claim]);

        assert!(apply_pool_status(&mut pool.status, &members, &plan));
        assert_eq!(pool.status.namespace_size, 2);
        assert_eq!(pool.status.claim_size, 1);
        assert_eq!(pool.status.allocation.claimed, rl(&[("limits.cpu", "1")]));
        assert_eq!(pool.status.allocation.available, rl(&[("limits.cpu", "1")]));
        assert!(pool.has_bound_claim("ns", "c-uid"));
        assert!(pool.status.conditions.is_true(ConditionType::Ready));

        // Same pass again: nothing to write.
        assert!(!apply_pool_status(&mut pool.status, &members, &plan));
    }

    #[test]
    fn bound_decisions_use_in_use_or_unused() {
        let [bound, exhausted] = decision_conditions(&make_decision(Outcome::Bound, &[("cpu", "1")]));
        assert!(bound.is_true());
        assert_eq!(bound.reason, IN_USE_REASON);
        assert!(!exhausted.is_true());

        let [bound, _] = decision_conditions(&make_decision(Outcome::Bound, &[("cpu", "0")]));
        assert!(bound.is_true());
        assert_eq!(bound.reason, UNUSED_REASON);
    }

    #[test]
    fn exhausted_decision_becomes_primary() {
        let mut status = ResourcePoolClaimStatus::default();
        let d = make_decision(
            Outcome::QueueExhausted {
                message: "requested: cpu=1, queued: cpu=4".into(),
            },
            &[("cpu", "1")],
        );
        assert!(apply_decision(&mut status, &d));
        let primary = status.condition.clone().unwrap();
        assert_eq!(primary.type_, ConditionType::Exhausted);
        assert_eq!(primary.reason, QUEUE_EXHAUSTED_REASON);
        assert!(!apply_decision(&mut status, &d));

        assert!(apply_decision(&mut status, &make_decision(Outcome::Bound, &[("cpu", "1")])));
        assert_eq!(status.condition.unwrap().type_, ConditionType::Bound);
    }

    #[test]
    fn failed_assignment_clears_unbound_reference() {
        let pool = ResourcePool::new("p", ResourceList::new());
        let mut status = ResourcePoolClaimStatus::default();
        assert!(mark_assigned(&mut status, &pool));
        assert_eq!(status.pool.name, "p");
        assert!(!mark_assigned(&mut status, &pool));

        assert!(mark_assignment_failed(&mut status, "no pool reference was defined"));
        assert!(status.pool.is_empty());
        let primary = status.condition.clone().unwrap();
        assert_eq!(primary.type_, ConditionType::Assigned);
        assert_eq!(primary.reason, FAILED_REASON);
    }

    #[test]
    fn failed_assignment_keeps_bound_reference() {
        let pool = ResourcePool::new("p", ResourceList::new());
        let mut status = ResourcePoolClaimStatus::default();
        mark_assigned(&mut status, &pool);
        apply_decision(&mut status, &make_decision(Outcome::Bound, &[("cpu", "1")]));
        mark_assignment_failed(&mut status, "can not change pool");
        assert_eq!(status.pool.name, "p");
    }

    #[test]
    fn unassign_resets_claim() {
        let pool = ResourcePool::new("p", ResourceList::new());
        let mut status = ResourcePoolClaimStatus::default();
        mark_assigned(&mut status, &pool);
        apply_decision(&mut status, &make_decision(Outcome::Bound, &[("cpu", "1")]));
        assert!(!is_unassigned(&status));
        assert!(mark_unassigned(&mut status, "pool p was deleted"));
        assert!(status.pool.is_empty());
        assert!(is_unassigned(&status));
        assert!(!mark_unassigned(&mut status, "pool p was deleted"));
        let bound = status.conditions.get(ConditionType::Bound).unwrap();
        assert!(!bound.is_true());
        assert_eq!(bound.reason, UNASSIGNED_REASON);
        assert!(status.conditions.get(ConditionType::Exhausted).is_none());
    }

    #[test]
    fn finalizer_follows_bound_count() {
        let mut pool = ResourcePool::new("p", ResourceList::new());
        assert_eq!(finalizer_action(&pool, 0), FinalizerAction::Keep);
        assert_eq!(finalizer_action(&pool, 1), FinalizerAction::Add);
        pool.metadata.add_finalizer(POOL_FINALIZER);
        assert_eq!(finalizer_action(&pool, 3), FinalizerAction::Keep);
        assert_eq!(finalizer_action(&pool, 0), FinalizerAction::Remove);
    }
}
