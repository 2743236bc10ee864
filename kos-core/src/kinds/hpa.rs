use serde::{Deserialize, Serialize};

use crate::object::{Kind, Object};

pub type HorizontalPodAutoscaler = Object<HpaSpec, HpaStatus>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleTargetRef {
    pub kind: Kind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricResourceName {
    Cpu,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricTargetType {
    Utilization,
    AverageValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub resource_name: MetricResourceName,
    pub target_type: MetricTargetType,
    /// Utilization: percentage points (e.g. 50.0 == 50%). AverageValue: a
    /// quantity string routed through `kos_core::quantity`.
    pub target_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilizationWindows {
    #[serde(default)]
    pub scale_up_seconds: i64,
    #[serde(default)]
    pub scale_down_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpaSpec {
    pub scale_target_ref: ScaleTargetRef,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub stabilization: StabilizationWindows,
}

impl Default for HpaSpec {
    fn default() -> Self {
        HpaSpec {
            scale_target_ref: ScaleTargetRef { kind: Kind::Deployment, name: String::new() },
            min_replicas: 1,
            max_replicas: 1,
            metrics: Vec::new(),
            stabilization: StabilizationWindows::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HpaStatus {
    #[serde(default)]
    pub current_replicas: u32,
    #[serde(default)]
    pub desired_replicas: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub last_scale_up_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub last_scale_down_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub current_metrics: Vec<f64>,
}
