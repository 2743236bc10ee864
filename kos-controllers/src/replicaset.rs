//! ReplicaSet Controller (spec component I). Keeps `observed` Pods equal
//! to `spec.replicas` and rolls up status from the matched Pod set.

use std::sync::Arc;

use async_trait::async_trait;
use kos_admission::Pipeline;
use kos_core::kinds::pod::{Pod, PodPhase, PodSpec};
use kos_core::kinds::workloads::ReplicaSet;
use kos_core::{selector, Error, Kind, Object, ObjectMeta, OwnerReference};
use kos_store::FileObjectStore;
use tracing::{debug, error};

use crate::cadence::REPLICASET_INTERVAL;
use crate::component::{Component, LoopHandle};
use crate::pod_admission::admit_and_create_pod;

pub struct ReplicaSetController {
    store: FileObjectStore,
    pipeline: Arc<Pipeline>,
    loop_handle: LoopHandle,
}

impl ReplicaSetController {
    pub fn new(store: FileObjectStore, pipeline: Arc<Pipeline>) -> Self {
        ReplicaSetController { store, pipeline, loop_handle: LoopHandle::new() }
    }
}

async fn reconcile_tick(store: &FileObjectStore, pipeline: &Pipeline) -> Result<(), Error> {
    let rses: Vec<ReplicaSet> = store.list(Kind::ReplicaSet, None, None).await?;
    for rs in rses {
        if let Err(e) = reconcile_one(store, pipeline, &rs).await {
            error!(rs = %rs.metadata.name, error = %e, "replicaset reconcile failed");
        }
    }
    Ok(())
}

async fn reconcile_one(store: &FileObjectStore, pipeline: &Pipeline, rs: &ReplicaSet) -> Result<(), Error> {
    let mut pods = matched_pods(store, rs).await?;
    pods.sort_by(|a, b| a.metadata.creation_timestamp.cmp(&b.metadata.creation_timestamp));

    let observed = pods.len() as u32;
    if observed < rs.spec.replicas {
        for _ in observed..rs.spec.replicas {
            create_pod_from_template(store, pipeline, rs).await?;
        }
    } else if observed > rs.spec.replicas {
        let excess = (observed - rs.spec.replicas) as usize;
        for pod in pods.iter().rev().take(excess) {
            if let Err(e) = store.delete(Kind::Pod, pod.metadata.namespace.as_deref(), &pod.metadata.name).await {
                if !matches!(e, Error::NotFound { .. }) {
                    return Err(e);
                }
            }
        }
    }

    update_status(store, rs, &pods).await
}

pub async fn matched_pods(store: &FileObjectStore, rs: &ReplicaSet) -> Result<Vec<Pod>, Error> {
    let all: Vec<Pod> = store.list(Kind::Pod, rs.metadata.namespace.as_deref(), None).await?;
    Ok(all
        .into_iter()
        .filter(|p| selector::matches_nonempty(&rs.spec.selector, &p.metadata.labels) || p.metadata.is_controlled_by(&rs.metadata.uid))
        .collect())
}

async fn create_pod_from_template(store: &FileObjectStore, pipeline: &Pipeline, rs: &ReplicaSet) -> Result<Pod, Error> {
    let name = format!("{}-{}", rs.metadata.name, short_random());
    let mut meta = ObjectMeta::new(name, rs.metadata.namespace.clone());
    meta.labels = rs.spec.template.labels.clone();
    meta.annotations = rs.spec.template.annotations.clone();
    meta.owner_references.push(OwnerReference::controller_of(Kind::ReplicaSet, rs.metadata.name.clone(), rs.metadata.uid.clone()));
    let spec: PodSpec = rs.spec.template.spec.clone();
    let pod: Pod = Object::new(Kind::Pod, meta, spec);
    admit_and_create_pod(store, pipeline, pod).await
}

fn short_random() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..5].to_string()
}

async fn update_status(store: &FileObjectStore, rs: &ReplicaSet, pods: &[Pod]) -> Result<(), Error> {
    let total = pods.len() as u32;
    let ready = pods.iter().filter(|p| p.status.all_containers_ready()).count() as u32;
    let available = pods.iter().filter(|p| p.status.phase == PodPhase::Running).count() as u32;
    let replica_failure = pods.iter().any(|p| p.status.phase == PodPhase::Failed);

    if rs.status.replicas == total && rs.status.ready_replicas == ready && rs.status.available_replicas == available && rs.status.replica_failure == replica_failure {
        return Ok(());
    }

    let mut updated = rs.clone();
    updated.status.replicas = total;
    updated.status.ready_replicas = ready;
    updated.status.available_replicas = available;
    updated.status.replica_failure = replica_failure;
    match store.update(updated).await {
        Ok(_) => {
            debug!(rs = %rs.metadata.name, total, ready, available, "replicaset status updated");
            Ok(())
        }
        Err(Error::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Used by the Deployment controller to drive a ReplicaSet's desired
/// replica count without re-deriving the whole spec.
pub async fn scale_to(store: &FileObjectStore, rs: &ReplicaSet, replicas: u32) -> Result<(), Error> {
    if rs.spec.replicas == replicas {
        return Ok(());
    }
    let mut updated = rs.clone();
    updated.spec.replicas = replicas;
    match store.update(updated).await {
        Ok(_) => Ok(()),
        Err(Error::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Component for ReplicaSetController {
    fn name(&self) -> &'static str {
        "replicaset-controller"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let pipeline = self.pipeline.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(REPLICASET_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store, &pipeline).await {
                            error!(error = %e, "replicaset reconcile tick failed");
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
    use kos_core::kinds::namespace::Namespace;
    use kos_core::kinds::workloads::ReplicaSetSpec;

    async fn store() -> (FileObjectStore, Pipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path());
        let ns: Namespace = Object::new(Kind::Namespace, ObjectMeta::new("default", None), Default::default());
        store.create(ns).await.unwrap();
        let pipeline = Pipeline::new(Vec::new(), store.clone());
        (store, pipeline, dir)
    }

    fn rs_with_replicas(name: &str, replicas: u32) -> ReplicaSet {
        let mut spec = ReplicaSetSpec { replicas, ..Default::default() };
        spec.selector.insert("app".into(), name.to_string());
        spec.template.labels.insert("app".into(), name.to_string());
        Object::new(Kind::ReplicaSet, ObjectMeta::new(name, Some("default".into())), spec)
    }

    #[tokio::test]
    async fn scales_up_to_desired_replicas() {
        let (store, pipeline, _dir) = store().await;
        let rs = store.create(rs_with_replicas("web", 3)).await.unwrap();

        reconcile_one(&store, &pipeline, &rs).await.unwrap();

        let pods: Vec<Pod> = store.list(Kind::Pod, Some("default"), None).await.unwrap();
        assert_eq!(pods.len(), 3);
        assert!(pods.iter().all(|p| p.metadata.owner_references.iter().any(|o| o.uid == rs.metadata.uid)));
    }

    #[tokio::test]
    async fn scales_down_removes_newest_first() {
        let (store, pipeline, _dir) = store().await;
        let rs = store.create(rs_with_replicas("web", 0)).await.unwrap();
        for _ in 0..2 {
            create_pod_from_template(&store, &pipeline, &rs).await.unwrap();
        }

        reconcile_one(&store, &pipeline, &rs).await.unwrap();

        let pods: Vec<Pod> = store.list(Kind::Pod, Some("default"), None).await.unwrap();
        assert!(pods.is_empty());
    }
}
