use pkg_constants::state::RESOURCE_QUOTAS_PREFIX;
use serde::{Deserialize, Serialize};

use crate::meta::{Object, ObjectMeta};
use crate::quantity::ResourceList;
use crate::selector::SelectorOperator;

/// Native per-namespace quota object. Written by pool projection only;
/// nothing here interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuota {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourceQuotaSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuotaSpec {
    #[serde(default)]
    pub hard: ResourceList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_selector: Option<ScopeSelector>,
}

/// Restricts which objects a quota counts, by scope name (`BestEffort`,
/// `PriorityClass`, ...). Carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<ScopedResourceSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedResourceSelectorRequirement {
    pub scope_name: String,
    pub operator: SelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl ResourceQuota {
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn key_for(namespace: &str, name: &str) -> String {
        format!("{}{}/{}", RESOURCE_QUOTAS_PREFIX, namespace, name)
    }

    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{}{}/", RESOURCE_QUOTAS_PREFIX, namespace)
    }
}

impl Object for ResourceQuota {
    const KIND: &'static str = "ResourceQuota";

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
