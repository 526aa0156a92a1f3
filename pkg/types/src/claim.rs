use pkg_constants::pool::{RELEASE_ANNOTATION, RELEASE_ANNOTATION_TRIGGER, RESOURCE_POOL_CLAIM_KIND};
use pkg_constants::state::RESOURCE_POOL_CLAIMS_PREFIX;
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, ConditionList, ConditionType};
use crate::meta::{Object, ObjectMeta};
use crate::quantity::ResourceList;

/// Namespaced request for a slice of a pool's quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePoolClaim {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourcePoolClaimSpec,
    #[serde(default)]
    pub status: ResourcePoolClaimStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePoolClaimSpec {
    /// Target pool; empty until assigned.
    #[serde(default)]
    pub pool: String,
    #[serde(default, alias = "claim")]
    pub resource_claims: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePoolClaimStatus {
    #[serde(default)]
    pub pool: PoolReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub conditions: ConditionList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReference {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

impl PoolReference {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.uid.is_empty()
    }
}

impl ResourcePoolClaim {
    pub fn new(namespace: &str, name: &str, pool: &str, resource_claims: ResourceList) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: ResourcePoolClaimSpec {
                pool: pool.to_string(),
                resource_claims,
            },
            status: ResourcePoolClaimStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    /// `<namespace>/<name>`, used in log lines and work queue keys.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }

    pub fn key_for(namespace: &str, name: &str) -> String {
        format!("{}{}/{}", RESOURCE_POOL_CLAIMS_PREFIX, namespace, name)
    }

    pub fn is_bound(&self) -> bool {
        self.status.conditions.is_true(ConditionType::Bound)
    }

    pub fn is_assigned(&self) -> bool {
        !self.status.pool.is_empty()
    }

    /// Assigned to the pool with this uid.
    pub fn is_assigned_to(&self, pool_uid: &str) -> bool {
        !pool_uid.is_empty() && self.status.pool.uid == pool_uid
    }

    /// Carries the release annotation with the trigger value.
    pub fn is_released(&self) -> bool {
        self.metadata
            .annotations
            .get(RELEASE_ANNOTATION)
            .is_some_and(|v| v == RELEASE_ANNOTATION_TRIGGER)
    }
}

impl Object for ResourcePoolClaim {
    const KIND: &'static str = RESOURCE_POOL_CLAIM_KIND;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn key(&self) -> String {
        Self::key_for(self.namespace(), &self.metadata.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::resource_list;

    #[test]
    fn accepts_claim_alias() {
        let claim: ResourcePoolClaim = serde_json::from_str(
            r#"{"metadata":{"name":"c","namespace":"ns"},"spec":{"pool":"p","claim":{"limits.cpu":"1"}}}"#,
        )
        .unwrap();
        assert_eq!(claim.spec.resource_claims.len(), 1);
        assert_eq!(claim.key(), "/registry/resourcepoolclaims/ns/c");
        assert_eq!(claim.full_name(), "ns/c");
        assert!(!claim.is_assigned());
        assert!(!claim.is_bound());
    }

    #[test]
    fn release_needs_the_trigger_value() {
        let mut claim = ResourcePoolClaim::new("ns", "a", "p", resource_list([("cpu", "1")]).unwrap());
        assert!(!claim.is_released());
        claim
            .metadata
            .annotations
            .insert(RELEASE_ANNOTATION.into(), "false".into());
        assert!(!claim.is_released());
        claim
            .metadata
            .annotations
            .insert(RELEASE_ANNOTATION.into(), "true".into());
        assert!(claim.is_released());
    }
}
