use serde::{Deserialize, Serialize};

use super::volume::ReclaimPolicy;
use crate::object::Object;

pub type StorageClass = Object<StorageClassSpec, StorageClassStatus>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageClassSpec {
    pub provisioner: String,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageClassStatus {}

/// The only provisioner the PV Binder knows how to satisfy by synthesising
/// a volume on the fly.
pub const LOCAL_PROVISIONER: &str = "kos.local";
