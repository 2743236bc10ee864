//! PV Binder (spec component H). Matches Pending PVCs to compatible
//! PersistentVolumes, dynamically provisions from a `kos.local`
//! StorageClass when nothing matches, and reclaims PVs whose claim has
//! been deleted.

use async_trait::async_trait;
use kos_core::kinds::storage_class::{StorageClass, LOCAL_PROVISIONER};
use kos_core::kinds::volume::{
    pv_satisfies, ClaimRef, PersistentVolume, PersistentVolumeClaim, PersistentVolumeSpec, PvPhase, PvcPhase, ReclaimPolicy,
};
use kos_core::{quantity, Error, Kind};
use kos_store::FileObjectStore;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cadence::PV_BINDER_INTERVAL;
use crate::component::{Component, LoopHandle};

pub struct PvBinder {
    store: FileObjectStore,
    loop_handle: LoopHandle,
}

impl PvBinder {
    pub fn new(store: FileObjectStore) -> Self {
        PvBinder { store, loop_handle: LoopHandle::new() }
    }
}

async fn reconcile_tick(store: &FileObjectStore) -> Result<(), Error> {
    bind_pending_claims(store).await?;
    reclaim_orphaned_volumes(store).await?;
    Ok(())
}

async fn bind_pending_claims(store: &FileObjectStore) -> Result<(), Error> {
    let pvcs: Vec<PersistentVolumeClaim> = store.list(Kind::PersistentVolumeClaim, None, None).await?;
    for pvc in pvcs {
        if pvc.status.phase != PvcPhase::Pending {
            continue;
        }
        if let Err(e) = bind_one(store, &pvc).await {
            error!(pvc = %pvc.metadata.name, error = %e, "pv binder failed on claim");
        }
    }
    Ok(())
}

async fn bind_one(store: &FileObjectStore, pvc: &PersistentVolumeClaim) -> Result<(), Error> {
    let ns = pvc.metadata.namespace.clone().unwrap_or_default();
    let pvc_request_bytes = quantity::parse_memory(&pvc.spec.requests_storage)?;

    let target = if let Some(volume_name) = &pvc.spec.volume_name {
        match store.get::<PersistentVolumeSpec, _>(Kind::PersistentVolume, None, volume_name).await {
            Ok(pv) if pv.status.phase == PvPhase::Available && pv_compatible(&pv.spec, pvc, pvc_request_bytes) => Some(pv),
            Ok(_) => None,
            Err(Error::NotFound { .. }) => None,
            Err(e) => return Err(e),
        }
    } else {
        let mut candidates: Vec<PersistentVolume> = store.list(Kind::PersistentVolume, None, None).await?;
        candidates.retain(|pv| pv.status.phase == PvPhase::Available && pv_compatible(&pv.spec, pvc, pvc_request_bytes));
        candidates.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        candidates.into_iter().next()
    };

    let pv = match target {
        Some(pv) => pv,
        None => match provision_dynamically(store, pvc, &ns, pvc_request_bytes).await? {
            Some(pv) => pv,
            None => {
                debug!(pvc = %pvc.metadata.name, "no compatible pv, staying pending");
                return Ok(());
            }
        },
    };

    let mut updated_pv = pv.clone();
    updated_pv.status.phase = PvPhase::Bound;
    updated_pv.status.claim_ref = Some(ClaimRef { namespace: ns.clone(), name: pvc.metadata.name.clone(), uid: pvc.metadata.uid.clone() });
    store.update(updated_pv).await?;

    let mut updated_pvc = pvc.clone();
    updated_pvc.status.phase = PvcPhase::Bound;
    updated_pvc.status.volume_name = Some(pv.metadata.name.clone());
    updated_pvc.status.capacity_storage = Some(pv.spec.capacity_storage.clone());
    updated_pvc.status.access_modes = pv.spec.access_modes.clone();
    store.update(updated_pvc).await?;

    debug!(pvc = %pvc.metadata.name, pv = %pv.metadata.name, "bound claim");
    Ok(())
}

fn pv_compatible(pv_spec: &PersistentVolumeSpec, pvc: &PersistentVolumeClaim, pvc_request_bytes: i64) -> bool {
    let pv_capacity_bytes = match quantity::parse_memory(&pv_spec.capacity_storage) {
        Ok(b) => b,
        Err(_) => return false,
    };
    pv_satisfies(pv_spec, &pvc.spec, pv_capacity_bytes, pvc_request_bytes)
}

async fn provision_dynamically(
    store: &FileObjectStore,
    pvc: &PersistentVolumeClaim,
    namespace: &str,
    pvc_request_bytes: i64,
) -> Result<Option<PersistentVolume>, Error> {
    let Some(class_name) = &pvc.spec.storage_class else { return Ok(None) };
    let class: StorageClass = match store.get(Kind::StorageClass, None, class_name).await {
        Ok(c) => c,
        Err(Error::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };
    if class.spec.provisioner != LOCAL_PROVISIONER {
        return Ok(None);
    }

    let name = format!("pvc-{}", Uuid::new_v4());
    let local_path = store.root().join("pv-data").join(&name);
    tokio::fs::create_dir_all(&local_path).await.map_err(|e| Error::Internal(format!("provisioning {}: {e}", local_path.display())))?;

    let spec = PersistentVolumeSpec {
        capacity_storage: quantity::format_memory(pvc_request_bytes),
        access_modes: pvc.spec.access_modes.clone(),
        volume_mode: pvc.spec.volume_mode,
        storage_class: Some(class_name.clone()),
        reclaim_policy: class.spec.reclaim_policy,
        local_path: local_path.to_string_lossy().into_owned(),
    };
    let pv: PersistentVolume = kos_core::Object::new(Kind::PersistentVolume, kos_core::ObjectMeta::new(name, None), spec);
    let created = store.create(pv).await?;
    debug!(pvc = %pvc.metadata.name, pv = %created.metadata.name, namespace, "dynamically provisioned volume");
    Ok(Some(created))
}

async fn reclaim_orphaned_volumes(store: &FileObjectStore) -> Result<(), Error> {
    let pvs: Vec<PersistentVolume> = store.list(Kind::PersistentVolume, None, None).await?;
    for pv in pvs {
        if pv.status.phase != PvPhase::Bound {
            continue;
        }
        let Some(claim_ref) = &pv.status.claim_ref else { continue };
        let still_exists = store.exists(Kind::PersistentVolumeClaim, Some(&claim_ref.namespace), &claim_ref.name).await;
        if still_exists {
            continue;
        }
        if let Err(e) = reclaim_one(store, pv).await {
            error!(error = %e, "failed to reclaim orphaned volume");
        }
    }
    Ok(())
}

async fn reclaim_one(store: &FileObjectStore, pv: PersistentVolume) -> Result<(), Error> {
    match pv.spec.reclaim_policy {
        ReclaimPolicy::Retain => {
            let mut updated = pv.clone();
            updated.status.phase = PvPhase::Released;
            updated.status.claim_ref = None;
            store.update(updated).await?;
        }
        ReclaimPolicy::Delete => {
            let path = std::path::PathBuf::from(&pv.spec.local_path);
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove reclaimed volume data");
                }
            }
            store.delete(Kind::PersistentVolume, None, &pv.metadata.name).await?;
        }
        ReclaimPolicy::Recycle => {
            let path = std::path::PathBuf::from(&pv.spec.local_path);
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to empty recycled volume data");
                }
            }
            tokio::fs::create_dir_all(&path).await.map_err(|e| Error::Internal(format!("recreating {}: {e}", path.display())))?;
            let mut updated = pv.clone();
            updated.status.phase = PvPhase::Available;
            updated.status.claim_ref = None;
            store.update(updated).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Component for PvBinder {
    fn name(&self) -> &'static str {
        "pv-binder"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(PV_BINDER_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store).await {
                            error!(error = %e, "pv binder tick failed");
                        }
                    }
                }
            }
        });
        self.loop_handle.spawn(self.name(), handle).await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.loop_handle.stop(self.name()).await;
        Ok(())
    }

    async fn healthy(&self) -> bool {
        self.loop_handle.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kos_core::kinds::volume::{AccessMode, PersistentVolumeClaimSpec, VolumeMode};
    use kos_core::{Object, ObjectMeta};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    fn available_pv(name: &str, size: &str) -> PersistentVolume {
        let spec = PersistentVolumeSpec {
            capacity_storage: size.to_string(),
            access_modes: vec![AccessMode::ReadWriteOnce],
            volume_mode: VolumeMode::Filesystem,
            storage_class: None,
            reclaim_policy: ReclaimPolicy::Retain,
            local_path: "/tmp/does-not-matter".to_string(),
        };
        Object::new(Kind::PersistentVolume, ObjectMeta::new(name, None), spec)
    }

    fn pending_pvc(name: &str, size: &str) -> PersistentVolumeClaim {
        let spec = PersistentVolumeClaimSpec {
            requests_storage: size.to_string(),
            access_modes: vec![AccessMode::ReadWriteOnce],
            storage_class: None,
            volume_name: None,
            volume_mode: VolumeMode::Filesystem,
        };
        Object::new(Kind::PersistentVolumeClaim, ObjectMeta::new(name, Some("default".into())), spec)
    }

    #[tokio::test]
    async fn binds_smallest_sufficient_pv_by_name_order() {
        let (store, _dir) = store();
        store.create(available_pv("pv-b", "10Gi")).await.unwrap();
        store.create(available_pv("pv-a", "10Gi")).await.unwrap();
        store.create(pending_pvc("claim", "5Gi")).await.unwrap();

        bind_pending_claims(&store).await.unwrap();

        let pvc: PersistentVolumeClaim = store.get(Kind::PersistentVolumeClaim, Some("default"), "claim").await.unwrap();
        assert_eq!(pvc.status.phase, PvcPhase::Bound);
        assert_eq!(pvc.status.volume_name.as_deref(), Some("pv-a"));
    }

    #[tokio::test]
    async fn undersized_pv_is_rejected() {
        let (store, _dir) = store();
        store.create(available_pv("pv-a", "1Gi")).await.unwrap();
        store.create(pending_pvc("claim", "5Gi")).await.unwrap();

        bind_pending_claims(&store).await.unwrap();

        let pvc: PersistentVolumeClaim = store.get(Kind::PersistentVolumeClaim, Some("default"), "claim").await.unwrap();
        assert_eq!(pvc.status.phase, PvcPhase::Pending);
    }

    #[tokio::test]
    async fn retain_policy_releases_without_deleting() {
        let (store, _dir) = store();
        let mut pv = available_pv("pv-a", "5Gi");
        pv.status.phase = PvPhase::Bound;
        pv.status.claim_ref = Some(ClaimRef { namespace: "default".into(), name: "gone".into(), uid: "x".into() });
        store.create(pv).await.unwrap();

        reclaim_orphaned_volumes(&store).await.unwrap();

        let updated: PersistentVolume = store.get(Kind::PersistentVolume, None, "pv-a").await.unwrap();
        assert_eq!(updated.status.phase, PvPhase::Released);
        assert!(updated.status.claim_ref.is_none());
    }
}
