//! Namespace Controller (supplemented feature, §5). Namespaces are
//! cluster-scoped and spec-less besides an Active/Terminating phase:
//! marking one Terminating drains every namespaced object it contains
//! before the Namespace object itself is removed.

use async_trait::async_trait;
use kos_core::kinds::namespace::{Namespace, NamespacePhase};
use kos_core::{Error, Kind, Object, ObjectMeta};
use kos_store::FileObjectStore;
use tracing::{debug, error, info};

use crate::cadence::NAMESPACE_RECONCILE_INTERVAL;
use crate::component::{Component, LoopHandle};

/// Every Kind whose objects live under a namespace directory, ordered so
/// owning/controller kinds are swept before the Pods and singletons they
/// would otherwise just respawn.
const NAMESPACED_KINDS: &[Kind] = &[
    Kind::CronJob,
    Kind::Job,
    Kind::HorizontalPodAutoscaler,
    Kind::Deployment,
    Kind::StatefulSet,
    Kind::ReplicaSet,
    Kind::Pod,
    Kind::Service,
    Kind::PersistentVolumeClaim,
    Kind::ResourceQuota,
    Kind::Secret,
    Kind::Event,
];

pub struct NamespaceController {
    store: FileObjectStore,
    loop_handle: LoopHandle,
}

impl NamespaceController {
    pub fn new(store: FileObjectStore) -> Self {
        NamespaceController { store, loop_handle: LoopHandle::new() }
    }
}

/// Idempotently creates `name` in the `Active` phase. Used at startup to
/// bootstrap the namespace(s) the control plane assumes exist, the same
/// way `node::register_local_node` bootstraps the local Node object.
pub async fn ensure_namespace(store: &FileObjectStore, name: &str) -> Result<(), Error> {
    if store.exists(Kind::Namespace, None, name).await {
        return Ok(());
    }
    let ns: Namespace = Object::new(Kind::Namespace, ObjectMeta::new(name, None), Default::default());
    match store.create(ns).await {
        Ok(_) | Err(Error::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Flips a namespace to `Terminating`; the reconcile loop picks it up from
/// there and cascades the delete. A no-op if already terminating.
pub async fn mark_terminating(store: &FileObjectStore, name: &str) -> Result<(), Error> {
    let ns: Namespace = store.get(Kind::Namespace, None, name).await?;
    if ns.status.phase == NamespacePhase::Terminating {
        return Ok(());
    }
    let mut updated = ns;
    updated.status.phase = NamespacePhase::Terminating;
    match store.update(updated).await {
        Ok(_) | Err(Error::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

async fn reconcile_tick(store: &FileObjectStore) -> Result<(), Error> {
    let namespaces: Vec<Namespace> = store.list(Kind::Namespace, None, None).await?;
    for ns in namespaces {
        if ns.status.phase != NamespacePhase::Terminating {
            continue;
        }
        if let Err(e) = reconcile_one(store, &ns).await {
            error!(namespace = %ns.metadata.name, error = %e, "namespace cascade failed");
        }
    }
    Ok(())
}

async fn reconcile_one(store: &FileObjectStore, ns: &Namespace) -> Result<(), Error> {
    let name = &ns.metadata.name;
    let mut found = 0usize;
    for &kind in NAMESPACED_KINDS {
        found += sweep_kind(store, kind, name).await?;
    }
    if found > 0 {
        debug!(namespace = %name, found, "namespace cascade in progress");
        return Ok(());
    }
    match store.delete(Kind::Namespace, None, name).await {
        Ok(()) | Err(Error::NotFound { .. }) => {
            info!(namespace = %name, "namespace fully terminated");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Deletes every object of `kind` in `namespace`, ignoring the concrete
/// spec/status shape (only `metadata.name` is needed to address the
/// delete), and returns how many were found this tick.
async fn sweep_kind(store: &FileObjectStore, kind: Kind, namespace: &str) -> Result<usize, Error> {
    let objects: Vec<Object<serde_json::Value, serde_json::Value>> = store.list(kind, Some(namespace), None).await?;
    let found = objects.len();
    for obj in objects {
        match store.delete(kind, Some(namespace), &obj.metadata.name).await {
            Ok(()) | Err(Error::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(found)
}

#[async_trait]
impl Component for NamespaceController {
    fn name(&self) -> &'static str {
        "namespace-controller"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(NAMESPACE_RECONCILE_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store).await {
                            error!(error = %e, "namespace reconcile tick failed");
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
    use kos_core::kinds::pod::{Pod, PodSpec};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn ensure_namespace_is_idempotent() {
        let (store, _dir) = store();
        ensure_namespace(&store, "default").await.unwrap();
        ensure_namespace(&store, "default").await.unwrap();

        let ns: Namespace = store.get(Kind::Namespace, None, "default").await.unwrap();
        assert_eq!(ns.status.phase, NamespacePhase::Active);
    }

    #[tokio::test]
    async fn terminating_namespace_drains_pods_before_removal() {
        let (store, _dir) = store();
        ensure_namespace(&store, "default").await.unwrap();
        let pod: Pod = Object::new(Kind::Pod, ObjectMeta::new("web", Some("default".into())), PodSpec::default());
        store.create(pod).await.unwrap();

        mark_terminating(&store, "default").await.unwrap();
        reconcile_tick(&store).await.unwrap();

        let pods: Vec<Pod> = store.list(Kind::Pod, Some("default"), None).await.unwrap();
        assert!(pods.is_empty());
        assert!(store.exists(Kind::Namespace, None, "default").await, "namespace should still exist after the draining tick");

        reconcile_tick(&store).await.unwrap();
        assert!(!store.exists(Kind::Namespace, None, "default").await, "namespace should be gone once fully drained");
    }
}
