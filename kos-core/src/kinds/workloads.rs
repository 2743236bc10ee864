use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::kinds::pod::PodSpec;
use crate::object::Object;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub spec: PodSpec,
}

// ---------------------------------------------------------------- ReplicaSet

pub type ReplicaSet = Object<ReplicaSetSpec, ReplicaSetStatus>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetSpec {
    pub replicas: u32,
    pub selector: HashMap<String, String>,
    pub template: PodTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetStatus {
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub available_replicas: u32,
    #[serde(default)]
    pub replica_failure: bool,
}

// ---------------------------------------------------------------- Deployment

pub type Deployment = Object<DeploymentSpec, DeploymentStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DeploymentStrategyType {
    Recreate,
    RollingUpdate,
}

impl Default for DeploymentStrategyType {
    fn default() -> Self {
        DeploymentStrategyType::RollingUpdate
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingUpdateSpec {
    #[serde(default = "default_one")]
    pub max_surge: u32,
    #[serde(default = "default_one")]
    pub max_unavailable: u32,
}

fn default_one() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub replicas: u32,
    pub selector: HashMap<String, String>,
    pub template: PodTemplateSpec,
    #[serde(default)]
    pub strategy: DeploymentStrategyType,
    #[serde(default)]
    pub rolling_update: RollingUpdateSpec,
    #[serde(default = "default_history_limit")]
    pub revision_history_limit: u32,
    #[serde(default)]
    pub paused: bool,
}

fn default_history_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub available_replicas: u32,
    #[serde(default)]
    pub updated_replicas: u32,
    #[serde(default)]
    pub progressing: bool,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub replica_failure: bool,
    /// template hash -> ReplicaSet name, newest last. Used by the
    /// controller to find the "current RS" and prune beyond the history
    /// limit.
    #[serde(default)]
    pub revision_history: Vec<String>,
}

// -------------------------------------------------------------- StatefulSet

pub type StatefulSet = Object<StatefulSetSpec, StatefulSetStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PodManagementPolicy {
    OrderedReady,
    Parallel,
}

impl Default for PodManagementPolicy {
    fn default() -> Self {
        PodManagementPolicy::OrderedReady
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StatefulSetUpdateStrategy {
    RollingUpdate,
    OnDelete,
}

impl Default for StatefulSetUpdateStrategy {
    fn default() -> Self {
        StatefulSetUpdateStrategy::RollingUpdate
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeClaimTemplate {
    pub name: String,
    pub storage: String,
    #[serde(default)]
    pub access_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatefulSetSpec {
    pub replicas: u32,
    pub selector: HashMap<String, String>,
    pub service_name: String,
    pub template: PodTemplateSpec,
    #[serde(default)]
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,
    #[serde(default)]
    pub pod_management_policy: PodManagementPolicy,
    #[serde(default)]
    pub update_strategy: StatefulSetUpdateStrategy,
    #[serde(default)]
    pub partition: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatefulSetStatus {
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
}

// --------------------------------------------------------------------- Job

pub type Job = Object<JobSpec, JobStatus>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default = "default_one")]
    pub parallelism: u32,
    #[serde(default = "default_one")]
    pub completions: u32,
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i64>,
    pub template: PodTemplateSpec,
}

fn default_backoff_limit() -> u32 {
    6
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobCondition {
    Complete,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<JobCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ------------------------------------------------------------------ CronJob

pub type CronJob = Object<CronJobSpec, CronJobStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConcurrencyPolicy {
    Allow,
    Forbid,
    Replace,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        ConcurrencyPolicy::Allow
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronJobSpec {
    pub schedule: String,
    pub job_template: JobSpec,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_deadline_seconds: Option<i64>,
    #[serde(default = "default_successful_history_limit")]
    pub successful_jobs_history_limit: u32,
    #[serde(default = "default_one")]
    pub failed_jobs_history_limit: u32,
    #[serde(default)]
    pub suspend: bool,
}

fn default_successful_history_limit() -> u32 {
    3
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_schedule_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub active_job_names: Vec<String>,
}
