use serde::{Deserialize, Serialize};

use crate::object::Object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum VolumeMode {
    Filesystem,
    Block,
}

impl Default for VolumeMode {
    fn default() -> Self {
        VolumeMode::Filesystem
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ReclaimPolicy {
    Retain,
    Delete,
    Recycle,
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        ReclaimPolicy::Retain
    }
}

// --------------------------------------------------------- PersistentVolume

pub type PersistentVolume = Object<PersistentVolumeSpec, PersistentVolumeStatus>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentVolumeSpec {
    pub capacity_storage: String,
    pub access_modes: Vec<AccessMode>,
    #[serde(default)]
    pub volume_mode: VolumeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    pub local_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PvPhase {
    Available,
    Bound,
    Released,
    Failed,
}

impl Default for PvPhase {
    fn default() -> Self {
        PvPhase::Available
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentVolumeStatus {
    pub phase: PvPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<ClaimRef>,
}

// ---------------------------------------------------- PersistentVolumeClaim

pub type PersistentVolumeClaim = Object<PersistentVolumeClaimSpec, PersistentVolumeClaimStatus>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentVolumeClaimSpec {
    pub requests_storage: String,
    pub access_modes: Vec<AccessMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(default)]
    pub volume_mode: VolumeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PvcPhase {
    Pending,
    Bound,
    Lost,
}

impl Default for PvcPhase {
    fn default() -> Self {
        PvcPhase::Pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentVolumeClaimStatus {
    pub phase: PvcPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(default)]
    pub capacity_storage: Option<String>,
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
}

/// A PV satisfies a PVC's request per the binder's compatibility checks.
pub fn pv_satisfies(
    pv: &PersistentVolumeSpec,
    pvc: &PersistentVolumeClaimSpec,
    pv_capacity_bytes: i64,
    pvc_request_bytes: i64,
) -> bool {
    let storage_class_matches = pv.storage_class == pvc.storage_class;
    let volume_mode_matches = pv.volume_mode == pvc.volume_mode;
    let access_modes_subset = pvc.access_modes.iter().all(|m| pv.access_modes.contains(m));
    let capacity_ok = pv_capacity_bytes >= pvc_request_bytes;
    storage_class_matches && volume_mode_matches && access_modes_subset && capacity_ok
}
