use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::object::Object;

pub type ResourceQuota = Object<ResourceQuotaSpec, ResourceQuotaStatus>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuotaSpec {
    /// Recognised keys: `pods`, `requests.cpu`, `requests.memory`,
    /// `limits.cpu`, `limits.memory`.
    pub hard: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuotaStatus {
    #[serde(default)]
    pub hard: HashMap<String, String>,
    #[serde(default)]
    pub used: HashMap<String, String>,
}

pub const QUOTA_PODS: &str = "pods";
pub const QUOTA_REQUESTS_CPU: &str = "requests.cpu";
pub const QUOTA_REQUESTS_MEMORY: &str = "requests.memory";
pub const QUOTA_LIMITS_CPU: &str = "limits.cpu";
pub const QUOTA_LIMITS_MEMORY: &str = "limits.memory";
