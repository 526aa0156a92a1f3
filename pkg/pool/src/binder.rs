//! Decides, for every claim aimed at a pool, whether it binds.
//!
//! Each pass replays the full claim set against a ledger that starts at
//! zero, so the result depends only on the pool and its current claims.
//! Claims the last pass had bound go first; the rest follow by creation
//! time, then name, then namespace.

use pkg_constants::pool::{FAILED_REASON, RELEASED_REASON};
use pkg_types::claim::ResourcePoolClaim;
use pkg_types::pool::{PoolClaimEntry, PoolExhaustion, ResourcePool};
use pkg_types::{Quantity, ResourceList};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::ledger::{Ledger, insufficient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Reserved against the ledger.
    Bound,
    /// Does not fit the current available amount.
    PoolExhausted { message: String },
    /// Held behind an earlier exhausted claim on the same resource.
    QueueExhausted { message: String },
    /// Targets the pool but is not eligible this pass: the namespace left
    /// the pool, the claim now names another pool, or it asked to be
    /// released. `reason` is the Bound condition reason.
    Released { reason: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct ClaimDecision {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub requested: ResourceList,
    pub outcome: Outcome,
}

impl ClaimDecision {
    pub fn is_bound(&self) -> bool {
        self.outcome == Outcome::Bound
    }

    /// Bound while requesting nothing but zeros.
    pub fn is_unused(&self) -> bool {
        self.is_bound() && self.requested.values().all(|q| q.is_zero())
    }
}

/// Output of one binder pass.
#[derive(Debug, Clone, Default)]
pub struct BindingPlan {
    /// Eligible claims in evaluation order, then released ones.
    pub decisions: Vec<ClaimDecision>,
    pub ledger: Ledger,
    pub exhaustions: BTreeMap<String, PoolExhaustion>,
}

impl BindingPlan {
    pub fn bound(&self) -> impl Iterator<Item = &ClaimDecision> {
        self.decisions.iter().filter(|d| d.is_bound())
    }

    pub fn bound_count(&self) -> usize {
        self.bound().count()
    }

    /// Bound claims grouped by namespace, each group sorted by name.
    pub fn bound_by_namespace(&self) -> BTreeMap<String, Vec<PoolClaimEntry>> {
        let mut out: BTreeMap<String, Vec<PoolClaimEntry>> = BTreeMap::new();
        for d in self.bound() {
            out.entry(d.namespace.clone()).or_default().push(PoolClaimEntry {
                name: d.name.clone(),
                uid: d.uid.clone(),
                claims: d.requested.clone(),
            });
        }
        for entries in out.values_mut() {
            entries.sort_by(|a, b| a.name.cmp(&b.name));
        }
        out
    }
}

/// Whether `claim` is assigned to this incarnation of `pool`.
pub fn targets_pool(pool: &ResourcePool, claim: &ResourcePoolClaim) -> bool {
    claim.is_assigned_to(pool.uid())
}

/// Run the binder for `pool` given its resolved `members` and every claim
/// that may target it. Claims aimed at other pools are ignored.
pub fn bind(pool: &ResourcePool, members: &[String], claims: &[ResourcePoolClaim]) -> BindingPlan {
    let members: BTreeSet<&str> = members.iter().map(String::as_str).collect();
    let ordered_queue = pool.spec.config.ordered_queue();

    let mut eligible = Vec::new();
    let mut released = Vec::new();
    for claim in claims.iter().filter(|c| targets_pool(pool, c)) {
        if claim.metadata.is_deleting() {
            continue;
        }
        if claim.is_released() {
            released.push(decision(
                claim,
                Outcome::Released {
                    reason: RELEASED_REASON,
                    message: format!("claim released from pool {}", pool.name()),
                },
            ));
        } else if !members.contains(claim.namespace()) {
            released.push(decision(
                claim,
                Outcome::Released {
                    reason: FAILED_REASON,
                    message: format!(
                        "namespace {} is not a member of pool {}",
                        claim.namespace(),
                        pool.name()
                    ),
                },
            ));
        } else if claim.spec.pool != pool.name() {
            released.push(decision(
                claim,
                Outcome::Released {
                    reason: FAILED_REASON,
                    message: format!("claim no longer references pool {}", pool.name()),
                },
            ));
        } else {
            eligible.push(claim);
        }
    }

    eligible.sort_by(|a, b| evaluation_order(pool, a, b));

    let mut ledger = Ledger::new(&pool.spec.quota.hard);
    let mut exhaustions: BTreeMap<String, PoolExhaustion> = BTreeMap::new();
    let mut decisions = Vec::with_capacity(eligible.len() + released.len());

    for claim in eligible {
        let requested = &claim.spec.resource_claims;
        let previously_bound = pool.has_bound_claim(claim.namespace(), claim.uid());

        if ordered_queue && !previously_bound {
            let queued: Vec<String> = requested
                .iter()
                .filter_map(|(name, want)| {
                    exhaustions.get(name).map(|ex| {
                        format!(
                            "requested: {}={}, queued: {}={}",
                            name, want, name, ex.requesting
                        )
                    })
                })
                .collect();
            if !queued.is_empty() {
                decisions.push(decision(
                    claim,
                    Outcome::QueueExhausted {
                        message: queued.join("; "),
                    },
                ));
                continue;
            }
        }

        if ledger.can_fit(requested) {
            ledger.bind(requested);
            decisions.push(decision(claim, Outcome::Bound));
            continue;
        }
        let short = insufficient(&ledger.available(), requested);

        let mut lines = Vec::with_capacity(short.len());
        for s in short {
            lines.push(format!(
                "requested: {}={}, available: {}={}",
                s.resource, s.requested, s.resource, s.available
            ));
            exhaustions
                .entry(s.resource)
                .and_modify(|ex| ex.requesting = ex.requesting + s.requested)
                .or_insert(PoolExhaustion {
                    available: s.available,
                    requesting: s.requested,
                });
        }
        decisions.push(decision(
            claim,
            Outcome::PoolExhausted {
                message: lines.join("; "),
            },
        ));
    }

    decisions.extend(released);
    BindingPlan {
        decisions,
        ledger,
        exhaustions,
    }
}

fn decision(claim: &ResourcePoolClaim, outcome: Outcome) -> ClaimDecision {
    ClaimDecision {
        namespace: claim.namespace().to_string(),
        name: claim.name().to_string(),
        uid: claim.uid().to_string(),
        requested: claim.spec.resource_claims.clone(),
        outcome,
    }
}

fn evaluation_order(pool: &ResourcePool, a: &ResourcePoolClaim, b: &ResourcePoolClaim) -> Ordering {
    let a_bound = pool.has_bound_claim(a.namespace(), a.uid());
    let b_bound = pool.has_bound_claim(b.namespace(), b.uid());
    b_bound
        .cmp(&a_bound)
        .then_with(|| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
        })
        .then_with(|| a.name().cmp(b.name()))
        .then_with(|| a.namespace().cmp(b.namespace()))
}

/// Sum of bound requests in one namespace, zero entries dropped.
pub fn namespace_sum(plan: &BindingPlan, namespace: &str) -> ResourceList {
    let mut sum = ResourceList::new();
    for d in plan.bound().filter(|d| d.namespace == namespace) {
        for (name, amount) in &d.requested {
            let current = sum.get(name).copied().unwrap_or_else(Quantity::zero);
            sum.insert(name.clone(), current + *amount);
        }
    }
    sum.retain(|_, q| !q.is_zero());
    sum
}
