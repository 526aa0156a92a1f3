//! Hard / claimed / available accounting for one pool.

use pkg_types::pool::PoolAllocation;
use pkg_types::{Quantity, ResourceList};

/// Direction of a ledger change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Bind,
    Release,
}

/// One resource a claim asked for more of than is available.
#[derive(Debug, Clone, PartialEq)]
pub struct Shortfall {
    pub resource: String,
    pub requested: Quantity,
    /// Zero when the pool does not define the resource.
    pub available: Quantity,
}

/// `hard - claimed` per hard key. Keys absent from `hard` are absent from
/// the result; nothing goes below zero.
pub fn compute_available(hard: &ResourceList, claimed: &ResourceList) -> ResourceList {
    hard.iter()
        .map(|(name, limit)| {
            let used = claimed.get(name).copied().unwrap_or_default();
            let left = *limit - used;
            let left = if left.is_negative() {
                Quantity::zero()
            } else {
                left
            };
            (name.clone(), left)
        })
        .collect()
}

/// True iff every requested key is present in `available` with at least the
/// requested amount.
pub fn can_fit(available: &ResourceList, requested: &ResourceList) -> bool {
    requested
        .iter()
        .all(|(name, want)| available.get(name).is_some_and(|have| have >= want))
}

/// Requested resources that do not fit, in resource-name order.
pub fn insufficient(available: &ResourceList, requested: &ResourceList) -> Vec<Shortfall> {
    requested
        .iter()
        .filter_map(|(name, want)| match available.get(name) {
            Some(have) if have >= want => None,
            have => Some(Shortfall {
                resource: name.clone(),
                requested: *want,
                available: have.copied().unwrap_or_default(),
            }),
        })
        .collect()
}

/// Add (bind) or subtract (release) `requested` from `claimed`. Releases
/// floor at zero.
pub fn apply(claimed: &ResourceList, requested: &ResourceList, op: Op) -> ResourceList {
    let mut out = claimed.clone();
    for (name, amount) in requested {
        let current = out.get(name).copied().unwrap_or_default();
        let next = match op {
            Op::Bind => current + *amount,
            Op::Release => {
                let left = current - *amount;
                if left.is_negative() {
                    Quantity::zero()
                } else {
                    left
                }
            }
        };
        out.insert(name.clone(), next);
    }
    out
}

/// A pool's ledger during a binder pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    hard: ResourceList,
    claimed: ResourceList,
}

impl Ledger {
    /// Fresh ledger: every hard key claimed at zero.
    pub fn new(hard: &ResourceList) -> Self {
        Self {
            hard: hard.clone(),
            claimed: hard
                .keys()
                .map(|k| (k.clone(), Quantity::zero()))
                .collect(),
        }
    }

    pub fn hard(&self) -> &ResourceList {
        &self.hard
    }

    pub fn claimed(&self) -> &ResourceList {
        &self.claimed
    }

    pub fn available(&self) -> ResourceList {
        compute_available(&self.hard, &self.claimed)
    }

    pub fn can_fit(&self, requested: &ResourceList) -> bool {
        can_fit(&self.available(), requested)
    }

    pub fn bind(&mut self, requested: &ResourceList) {
        self.claimed = apply(&self.claimed, requested, Op::Bind);
    }

    pub fn allocation(&self) -> PoolAllocation {
        PoolAllocation {
            hard: self.hard.clone(),
            claimed: self.claimed.clone(),
            available: self.available(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::quantity::resource_list;

    fn rl(pairs: &[(&str, &str)]) -> ResourceList {
        resource_list(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn available_is_hard_minus_claimed() {
        let hard = rl(&[("limits.cpu", "4"), ("limits.memory", "2Gi")]);
        let claimed = rl(&[("limits.cpu", "1500m")]);
        let available = compute_available(&hard, &claimed);
        assert_eq!(available, rl(&[("limits.cpu", "2500m"), ("limits.memory", "2Gi")]));
    }

    #[test]
    fn available_floors_at_zero_and_ignores_unknown_keys() {
        let hard = rl(&[("limits.cpu", "1")]);
        let claimed = rl(&[("limits.cpu", "3"), ("pods", "2")]);
        let available = compute_available(&hard, &claimed);
        assert_eq!(available, rl(&[("limits.cpu", "0")]));
    }

    #[test]
    fn can_fit_requires_every_key() {
        let available = rl(&[("limits.cpu", "2")]);
        assert!(can_fit(&available, &rl(&[("limits.cpu", "2")])));
        assert!(!can_fit(&available, &rl(&[("limits.cpu", "2001m")])));
        assert!(!can_fit(&available, &rl(&[("limits.memory", "0")])));
        assert!(can_fit(&available, &ResourceList::new()));
    }

    #[test]
    fn insufficient_lists_shortfalls_in_order() {
        let available = rl(&[("limits.cpu", "1"), ("requests.cpu", "5")]);
        let requested = rl(&[("requests.cpu", "1"), ("limits.cpu", "2"), ("gpu", "1")]);
        let short = insufficient(&available, &requested);
        let names: Vec<_> = short.iter().map(|s| s.resource.as_str()).collect();
        assert_eq!(names, vec!["gpu", "limits.cpu"]);
        assert!(short[0].available.is_zero());
        assert_eq!(short[1].requested.to_string(), "2");
    }

    #[test]
    fn apply_bind_then_release_is_identity() {
        let claimed = rl(&[("limits.cpu", "1")]);
        let req = rl(&[("limits.cpu", "500m"), ("pods", "2")]);
        let bound = apply(&claimed, &req, Op::Bind);
        assert_eq!(bound, rl(&[("limits.cpu", "1500m"), ("pods", "2")]));
        let released = apply(&bound, &req, Op::Release);
        assert_eq!(released, rl(&[("limits.cpu", "1"), ("pods", "0")]));
        let floored = apply(&released, &rl(&[("pods", "5")]), Op::Release);
        assert!(floored["pods"].is_zero());
    }

    #[test]
    fn ledger_tracks_allocation() {
        let mut ledger = Ledger::new(&rl(&[("limits.cpu", "2")]));
        assert_eq!(ledger.claimed(), &rl(&[("limits.cpu", "0")]));
        ledger.bind(&rl(&[("limits.cpu", "1")]));
        assert!(ledger.can_fit(&rl(&[("limits.cpu", "1")])));
        assert!(!ledger.can_fit(&rl(&[("limits.cpu", "2")])));
        let alloc = ledger.allocation();
        assert_eq!(alloc.available, rl(&[("limits.cpu", "1")]));
        ledger.bind(&rl(&[("limits.cpu", "1")]));
        assert!(ledger.available()["limits.cpu"].is_zero());
    }
}
