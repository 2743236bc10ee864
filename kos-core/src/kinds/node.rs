use serde::{Deserialize, Serialize};

use crate::kinds::pod::TaintEffect;
use crate::object::Object;

pub type Node = Object<NodeSpec, NodeStatus>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_cidr: Option<String>,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceCapacity {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
    pub pods: i64,
    #[serde(default)]
    pub ephemeral_storage_bytes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeConditionType {
    Ready,
    MemoryPressure,
    DiskPressure,
    PidPressure,
    NetworkUnavailable,
}

/// Tri-state: node conditions start `True`/`False` from local probes but
/// fall back to `Unknown` once heartbeats go stale (Node Registry §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(b: bool) -> Self {
        if b {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: NodeConditionType,
    pub status: ConditionStatus,
    pub last_heartbeat_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub capacity: ResourceCapacity,
    pub allocatable: ResourceCapacity,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
    #[serde(default)]
    pub node_info: std::collections::HashMap<String, String>,
}

impl NodeStatus {
    /// Scheduler treats anything other than `Ready=True` as unschedulable.
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .find(|c| c.condition_type == NodeConditionType::Ready)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    pub fn condition(&self, condition_type: NodeConditionType) -> Option<&NodeCondition> {
        self.conditions.iter().find(|c| c.condition_type == condition_type)
    }

    pub fn set_condition(&mut self, condition_type: NodeConditionType, status: ConditionStatus, now: chrono::DateTime<chrono::Utc>) {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.condition_type == condition_type) {
            existing.status = status;
            existing.last_heartbeat_time = now;
        } else {
            self.conditions.push(NodeCondition { condition_type, status, last_heartbeat_time: now });
        }
    }
}
