use anyhow::anyhow;
use pkg_pool::membership::pools_for_namespace;
use pkg_types::claim::ResourcePoolClaim;
use pkg_types::namespace::Namespace;
use pkg_types::pool::ResourcePool;
use pkg_types::validate::{validate_name, validate_resource_list};
use tracing::debug;

use crate::error::{AdmissionError, AdmissionResult, deny};

/// Shape checks shared by create and update.
pub fn validate_claim(claim: &ResourcePoolClaim) -> AdmissionResult<()> {
    validate_name(claim.name()).map_err(|e| AdmissionError::Denied(e.to_string()))?;
    if claim.namespace().is_empty() {
        return deny("claim namespace must not be empty");
    }
    validate_resource_list("spec.resourceClaims", &claim.spec.resource_claims)
        .map_err(|e| AdmissionError::Denied(e.to_string()))?;
    Ok(())
}

/// While bound, a claim's pool and requested resources are frozen.
pub fn validate_claim_update(
    old: &ResourcePoolClaim,
    new: &ResourcePoolClaim,
) -> AdmissionResult<()> {
    validate_claim(new)?;
    if old.is_bound()
        && (old.spec.pool != new.spec.pool
            || old.spec.resource_claims != new.spec.resource_claims)
    {
        return deny(format!(
            "cannot change the requested resources while claim is allocated to resourcepool {}",
            old.status.pool.name
        ));
    }
    Ok(())
}

/// A bound claim can only be removed by its pool's cascade.
pub fn validate_claim_delete(claim: &ResourcePoolClaim) -> AdmissionResult<()> {
    if claim.is_bound() {
        return deny(format!(
            "cannot delete the claim while it is used in resourcepool {}",
            claim.status.pool.name
        ));
    }
    Ok(())
}

/// Mutating guard: fill an empty `spec.pool` with the first pool (by name)
/// whose selectors match the claim's namespace and whose hard quota defines
/// every requested resource. Capacity is not considered. Returns the chosen
/// pool, if any.
pub fn auto_assign(
    claim: &mut ResourcePoolClaim,
    namespace: Option<&Namespace>,
    pools: &[ResourcePool],
) -> AdmissionResult<Option<String>> {
    if !claim.spec.pool.is_empty() {
        return Ok(None);
    }
    let Some(namespace) = namespace else {
        return Ok(None);
    };
    if namespace.name() != claim.namespace() {
        return Err(AdmissionError::Internal(anyhow!(
            "namespace {} does not match claim namespace {}",
            namespace.name(),
            claim.namespace()
        )));
    }

    let chosen = pools_for_namespace(pools, namespace)
        .into_iter()
        .find(|pool| {
            claim
                .spec
                .resource_claims
                .keys()
                .all(|r| pool.spec.quota.hard.contains_key(r))
        })
        .map(|pool| pool.name().to_string());

    if let Some(name) = &chosen {
        debug!("Claim {}: auto-assigned to pool {}", claim.full_name(), name);
        claim.spec.pool = name.clone();
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::ResourceList;
    use pkg_types::claim::PoolReference;
    use pkg_types::condition::{Condition, ConditionType};
    use pkg_types::quantity::resource_list;
    use pkg_types::selector::LabelSelector;

    fn rl(pairs: &[(&str, &str)]) -> ResourceList {
        resource_list(pairs.iter().copied()).unwrap()
    }

    fn make_bound_claim() -> ResourcePoolClaim {
        let mut claim = ResourcePoolClaim::new("ns", "c", "pool", rl(&[("limits.cpu", "1")]));
        claim.status.pool = PoolReference {
            name: "pool".into(),
            uid: "uid".into(),
        };
        claim
            .status
            .conditions
            .update(Condition::new(ConditionType::Bound, true, "InUse", ""));
        claim
    }

    fn make_pool(name: &str, team: &str, hard: &[(&str, &str)]) -> ResourcePool {
        let mut pool = ResourcePool::new(name, rl(hard));
        pool.spec.selectors = vec![LabelSelector::from_labels([("team", team)])];
        pool
    }

    #[test]
    fn bound_claim_is_frozen() {
        let old = make_bound_claim();

        let mut resized = old.clone();
        resized.spec.resource_claims = rl(&[("limits.cpu", "2")]);
        assert!(matches!(
            validate_claim_update(&old, &resized),
            Err(AdmissionError::Denied(_))
        ));

        let mut moved = old.clone();
        moved.spec.pool = "other".into();
        assert!(matches!(
            validate_claim_update(&old, &moved),
            Err(AdmissionError::Denied(_))
        ));

        // Same value, different notation.
        let mut same = old.clone();
        same.spec.resource_claims = rl(&[("limits.cpu", "1000m")]);
        assert!(validate_claim_update(&old, &same).is_ok());
    }

    #[test]
    fn unbound_claim_may_change_and_be_deleted() {
        let mut old = make_bound_claim();
        old.status
            .conditions
            .update(Condition::new(ConditionType::Bound, false, "Unassigned", ""));
        let mut new = old.clone();
        new.spec.resource_claims = rl(&[("limits.cpu", "5")]);
        new.spec.pool = "other".into();
        assert!(validate_claim_update(&old, &new).is_ok());
        assert!(validate_claim_delete(&old).is_ok());
    }

    #[test]
    fn bound_claim_delete_is_denied() {
        match validate_claim_delete(&make_bound_claim()) {
            Err(AdmissionError::Denied(msg)) => assert!(msg.contains("resourcepool pool")),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn create_rejects_negative_requests() {
        let claim = ResourcePoolClaim::new("ns", "c", "", rl(&[("limits.cpu", "-1")]));
        assert!(validate_claim(&claim).is_err());
        let claim = ResourcePoolClaim::new("ns", "c", "", rl(&[("limits.cpu", "1")]));
        assert!(validate_claim(&claim).is_ok());
    }

    #[test]
    fn auto_assign_picks_first_compatible_pool() {
        let ns = Namespace::new("ns").with_label("team", "a");
        let pools = vec![
            make_pool("a-memory", "a", &[("limits.memory", "8Gi")]),
            make_pool("b-cpu", "a", &[("limits.cpu", "1")]),
            make_pool("c-cpu", "a", &[("limits.cpu", "100")]),
            make_pool("0-cpu-elsewhere", "b", &[("limits.cpu", "100")]),
        ];
        let mut claim = ResourcePoolClaim::new("ns", "c", "", rl(&[("limits.cpu", "4")]));
        let chosen = auto_assign(&mut claim, Some(&ns), &pools).unwrap();
        // Capacity is ignored: b-cpu wins on name even though it only has 1.
        assert_eq!(chosen.as_deref(), Some("b-cpu"));
        assert_eq!(claim.spec.pool, "b-cpu");
    }

    #[test]
    fn auto_assign_leaves_pool_empty_without_candidate() {
        let ns = Namespace::new("ns").with_label("team", "a");
        let pools = vec![make_pool("mem", "a", &[("limits.memory", "1Gi")])];
        let mut claim = ResourcePoolClaim::new("ns", "c", "", rl(&[("limits.cpu", "1")]));
        assert_eq!(auto_assign(&mut claim, Some(&ns), &pools).unwrap(), None);
        assert!(claim.spec.pool.is_empty());
        assert_eq!(auto_assign(&mut claim, None, &pools).unwrap(), None);
    }

    #[test]
    fn auto_assign_keeps_explicit_pool() {
        let ns = Namespace::new("ns").with_label("team", "a");
        let pools = vec![make_pool("cpu", "a", &[("limits.cpu", "1")])];
        let mut claim = ResourcePoolClaim::new("ns", "c", "mine", rl(&[("limits.cpu", "1")]));
        assert_eq!(auto_assign(&mut claim, Some(&ns), &pools).unwrap(), None);
        assert_eq!(claim.spec.pool, "mine");
    }
}
