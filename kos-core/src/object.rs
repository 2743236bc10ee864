use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every kind the core persists. Used to derive on-disk paths
/// (`<root>/<kind>s/<namespace>/<name>.json`) and to tag owner references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Pod,
    Node,
    Service,
    ReplicaSet,
    Deployment,
    StatefulSet,
    Job,
    CronJob,
    ResourceQuota,
    PersistentVolume,
    PersistentVolumeClaim,
    HorizontalPodAutoscaler,
    Event,
    Secret,
    Namespace,
    StorageClass,
}

impl Kind {
    /// Directory segment under the store root, e.g. `Pod` -> `Pods`.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Kind::Pod => "Pods",
            Kind::Node => "Nodes",
            Kind::Service => "Services",
            Kind::ReplicaSet => "ReplicaSets",
            Kind::Deployment => "Deployments",
            Kind::StatefulSet => "StatefulSets",
            Kind::Job => "Jobs",
            Kind::CronJob => "CronJobs",
            Kind::ResourceQuota => "ResourceQuotas",
            Kind::PersistentVolume => "PersistentVolumes",
            Kind::PersistentVolumeClaim => "PersistentVolumeClaims",
            Kind::HorizontalPodAutoscaler => "HorizontalPodAutoscalers",
            Kind::Event => "Events",
            Kind::Secret => "Secrets",
            Kind::Namespace => "Namespaces",
            Kind::StorageClass => "StorageClasses",
        }
    }

    /// Cluster-scoped kinds drop the namespace path segment.
    pub fn cluster_scoped(&self) -> bool {
        matches!(self, Kind::Node | Kind::PersistentVolume | Kind::Namespace | Kind::StorageClass)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Pod => "Pod",
            Kind::Node => "Node",
            Kind::Service => "Service",
            Kind::ReplicaSet => "ReplicaSet",
            Kind::Deployment => "Deployment",
            Kind::StatefulSet => "StatefulSet",
            Kind::Job => "Job",
            Kind::CronJob => "CronJob",
            Kind::ResourceQuota => "ResourceQuota",
            Kind::PersistentVolume => "PersistentVolume",
            Kind::PersistentVolumeClaim => "PersistentVolumeClaim",
            Kind::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Kind::Event => "Event",
            Kind::Secret => "Secret",
            Kind::Namespace => "Namespace",
            Kind::StorageClass => "StorageClass",
        }
    }
}

/// A reference to the owning object of an `ownerReferences` entry.
/// `controller = true` entries participate in cascade-delete GC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: Kind,
    pub name: String,
    pub uid: String,
    pub controller: bool,
    pub block_owner_deletion: bool,
}

impl OwnerReference {
    pub fn controller_of(kind: Kind, name: impl Into<String>, uid: impl Into<String>) -> Self {
        OwnerReference {
            kind,
            name: name.into(),
            uid: uid.into(),
            controller: true,
            block_owner_deletion: true,
        }
    }
}

/// The envelope shared by every object, per the data model's `metadata`
/// section. `spec`/`status` live alongside this in [`Object`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub resource_version: u64,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        ObjectMeta {
            name: name.into(),
            namespace,
            uid: String::new(),
            generation: 1,
            resource_version: 0,
            creation_timestamp: Utc::now(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            owner_references: Vec::new(),
        }
    }

    /// Assigns a fresh uid if one hasn't been assigned yet. Called by the
    /// store on first create; never reassigned afterwards.
    pub fn assign_uid_if_missing(&mut self) {
        if self.uid.is_empty() {
            self.uid = Uuid::new_v4().to_string();
        }
    }

    pub fn is_controlled_by(&self, owner_uid: &str) -> bool {
        self.owner_references
            .iter()
            .any(|r| r.controller && r.uid == owner_uid)
    }
}

/// The generic envelope: a `Kind`-tagged object carrying a typed spec and
/// status. Concrete kinds (see `kinds/`) are type aliases over this, e.g.
/// `type Pod = Object<PodSpec, PodStatus>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object<Spec, Status> {
    pub kind: Kind,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub metadata: ObjectMeta,
    pub spec: Spec,
    #[serde(default)]
    pub status: Status,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl<Spec, Status: Default> Object<Spec, Status> {
    pub fn new(kind: Kind, metadata: ObjectMeta, spec: Spec) -> Self {
        Object {
            kind,
            api_version: default_api_version(),
            metadata,
            spec,
            status: Status::default(),
        }
    }
}
