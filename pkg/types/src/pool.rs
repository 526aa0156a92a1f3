use pkg_constants::pool::{QUOTA_NAME_PREFIX, RESOURCE_POOL_KIND};
use pkg_constants::state::RESOURCE_POOLS_PREFIX;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::condition::ConditionList;
use crate::meta::{Object, ObjectMeta, OwnerReference};
use crate::quantity::{Quantity, ResourceList};
use crate::quota::ScopeSelector;
use crate::selector::LabelSelector;

/// Cluster-scoped pool of quota shared by the namespaces its selectors match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePool {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourcePoolSpec,
    #[serde(default)]
    pub status: ResourcePoolStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePoolSpec {
    /// OR-combined namespace selectors.
    #[serde(default)]
    pub selectors: Vec<LabelSelector>,
    #[serde(default)]
    pub quota: PoolQuota,
    /// Applied to member namespaces without a claim for that resource.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: ResourceList,
    #[serde(default)]
    pub config: PoolConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolQuota {
    #[serde(default)]
    pub hard: ResourceList,
    /// Copied onto every projected quota.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_selector: Option<ScopeSelector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordered_queue: Option<bool>,
    #[serde(
        default,
        rename = "defaultsZero",
        alias = "defaultsAssignZero",
        skip_serializing_if = "Option::is_none"
    )]
    pub defaults_assign_zero: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_bound_resources: Option<bool>,
}

impl PoolConfig {
    pub fn ordered_queue(&self) -> bool {
        self.ordered_queue.unwrap_or(false)
    }

    pub fn defaults_assign_zero(&self) -> bool {
        self.defaults_assign_zero.unwrap_or(false)
    }

    pub fn delete_bound_resources(&self) -> bool {
        self.delete_bound_resources.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePoolStatus {
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub namespace_size: usize,
    /// Number of bound claims.
    #[serde(default)]
    pub claim_size: usize,
    /// Bound claims per namespace.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub claims: BTreeMap<String, Vec<PoolClaimEntry>>,
    #[serde(default)]
    pub allocation: PoolAllocation,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exhaustions: BTreeMap<String, PoolExhaustion>,
    #[serde(default)]
    pub conditions: ConditionList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolClaimEntry {
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub claims: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolAllocation {
    #[serde(default)]
    pub hard: ResourceList,
    #[serde(default)]
    pub claimed: ResourceList,
    #[serde(default)]
    pub available: ResourceList,
}

/// Unmet demand for one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolExhaustion {
    pub available: Quantity,
    pub requesting: Quantity,
}

impl ResourcePool {
    pub fn new(name: impl Into<String>, hard: ResourceList) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: ResourcePoolSpec {
                quota: PoolQuota {
                    hard,
                    ..Default::default()
                },
                ..Default::default()
            },
            status: ResourcePoolStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    /// Name of the ResourceQuota projected into each member namespace.
    pub fn quota_name(&self) -> String {
        quota_name_for(&self.metadata.name)
    }

    pub fn key_for(name: &str) -> String {
        format!("{}{}", RESOURCE_POOLS_PREFIX, name)
    }

    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: RESOURCE_POOL_KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
        }
    }

    /// Whether the last persisted ledger lists the claim as bound.
    pub fn has_bound_claim(&self, namespace: &str, uid: &str) -> bool {
        self.status
            .claims
            .get(namespace)
            .is_some_and(|entries| entries.iter().any(|e| e.uid == uid))
    }

    pub fn is_member(&self, namespace: &str) -> bool {
        self.status.namespaces.iter().any(|n| n == namespace)
    }
}

pub fn quota_name_for(pool: &str) -> String {
    format!("{}{}", QUOTA_NAME_PREFIX, pool)
}

impl Object for ResourcePool {
    const KIND: &'static str = RESOURCE_POOL_KIND;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn key(&self) -> String {
        Self::key_for(&self.metadata.name)
    }
}
