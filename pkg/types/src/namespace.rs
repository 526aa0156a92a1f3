use pkg_constants::state::NAMESPACES_PREFIX;
use serde::{Deserialize, Serialize};

use crate::meta::{Object, ObjectMeta};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespacePhase {
    #[default]
    Active,
    Terminating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub phase: NamespacePhase,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            phase: NamespacePhase::Active,
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Terminating or marked for deletion.
    pub fn is_terminating(&self) -> bool {
        self.phase == NamespacePhase::Terminating || self.metadata.is_deleting()
    }

    pub fn key_for(name: &str) -> String {
        format!("{}{}", NAMESPACES_PREFIX, name)
    }
}

impl Object for Namespace {
    const KIND: &'static str = "Namespace";

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
