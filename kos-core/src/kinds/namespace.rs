use serde::{Deserialize, Serialize};

use crate::object::Object;

pub type Namespace = Object<NamespaceSpec, NamespaceStatus>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSpec {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NamespacePhase {
    Active,
    Terminating,
}

impl Default for NamespacePhase {
    fn default() -> Self {
        NamespacePhase::Active
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceStatus {
    pub phase: NamespacePhase,
}
