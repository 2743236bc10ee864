//! StatefulSet Controller (spec component K). Maintains ordered Pod
//! identities `<sts>-<ordinal>` and a PVC per volumeClaimTemplate per
//! ordinal.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kos_admission::{Operation, Pipeline};
use kos_core::kinds::pod::{Pod, PodSpec, VolumeMount};
use kos_core::kinds::volume::{AccessMode, PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeMode};
use kos_core::kinds::workloads::{PodManagementPolicy, StatefulSet, StatefulSetUpdateStrategy};
use kos_core::{selector, Error, Kind, Object, ObjectMeta, OwnerReference};
use kos_store::FileObjectStore;
use tracing::{debug, error};

use crate::cadence::STATEFULSET_INTERVAL;
use crate::component::{Component, LoopHandle};
use crate::pod_admission::admit_and_create_pod;
use crate::template_hash::template_hash;

const TEMPLATE_HASH_ANNOTATION: &str = "kos.local/template-hash";

pub struct StatefulSetController {
    store: FileObjectStore,
    pipeline: Arc<Pipeline>,
    loop_handle: LoopHandle,
}

impl StatefulSetController {
    pub fn new(store: FileObjectStore, pipeline: Arc<Pipeline>) -> Self {
        StatefulSetController { store, pipeline, loop_handle: LoopHandle::new() }
    }
}

async fn reconcile_tick(store: &FileObjectStore, pipeline: &Pipeline) -> Result<(), Error> {
    let sets: Vec<StatefulSet> = store.list(Kind::StatefulSet, None, None).await?;
    for sts in sets {
        if let Err(e) = reconcile_one(store, pipeline, &sts).await {
            error!(statefulset = %sts.metadata.name, error = %e, "statefulset reconcile failed");
        }
    }
    Ok(())
}

fn pod_name(sts: &StatefulSet, ordinal: u32) -> String {
    format!("{}-{ordinal}", sts.metadata.name)
}

async fn indexed_pods(store: &FileObjectStore, sts: &StatefulSet) -> Result<BTreeMap<u32, Pod>, Error> {
    let all: Vec<Pod> = store.list(Kind::Pod, sts.metadata.namespace.as_deref(), None).await?;
    let mut indexed = BTreeMap::new();
    for pod in all {
        if !selector::matches_nonempty(&sts.spec.selector, &pod.metadata.labels) && !pod.metadata.is_controlled_by(&sts.metadata.uid) {
            continue;
        }
        if let Some(ordinal) = ordinal_of(sts, &pod.metadata.name) {
            indexed.insert(ordinal, pod);
        }
    }
    Ok(indexed)
}

fn ordinal_of(sts: &StatefulSet, pod_name: &str) -> Option<u32> {
    pod_name.strip_prefix(&format!("{}-", sts.metadata.name)).and_then(|s| s.parse().ok())
}

async fn reconcile_one(store: &FileObjectStore, pipeline: &Pipeline, sts: &StatefulSet) -> Result<(), Error> {
    let mut pods = indexed_pods(store, sts).await?;

    for ordinal in 0..sts.spec.replicas {
        if let Some(pod) = pods.get(&ordinal) {
            if sts.spec.pod_management_policy == PodManagementPolicy::OrderedReady && !pod.status.all_containers_ready() {
                break;
            }
            continue;
        }
        let pod = create_ordinal(store, pipeline, sts, ordinal).await?;
        pods.insert(ordinal, pod);
        if sts.spec.pod_management_policy == PodManagementPolicy::OrderedReady {
            break;
        }
    }

    let excess: Vec<u32> = pods.keys().filter(|&&o| o >= sts.spec.replicas).rev().copied().collect();
    for ordinal in excess {
        store.delete(Kind::Pod, sts.metadata.namespace.as_deref(), &pod_name(sts, ordinal)).await.ok();
        if sts.spec.pod_management_policy == PodManagementPolicy::OrderedReady {
            break;
        }
    }

    if sts.spec.update_strategy == StatefulSetUpdateStrategy::RollingUpdate {
        roll_partition(store, sts, &pods).await?;
    }

    update_status(store, sts, &pods).await
}

async fn create_ordinal(store: &FileObjectStore, pipeline: &Pipeline, sts: &StatefulSet, ordinal: u32) -> Result<Pod, Error> {
    for template in &sts.spec.volume_claim_templates {
        ensure_pvc(store, pipeline, sts, ordinal, template).await?;
    }

    let mut spec: PodSpec = sts.spec.template.spec.clone();
    spec.hostname = Some(pod_name(sts, ordinal));
    spec.subdomain = Some(sts.spec.service_name.clone());
    for template in &sts.spec.volume_claim_templates {
        let claim_name = format!("{}-{}", template.name, pod_name(sts, ordinal));
        for container in &mut spec.containers {
            container.volume_mounts.push(VolumeMount { name: claim_name.clone(), mount_path: template.mount_path.clone(), read_only: false });
        }
    }

    let mut meta = ObjectMeta::new(pod_name(sts, ordinal), sts.metadata.namespace.clone());
    meta.labels = sts.spec.template.labels.clone();
    meta.labels.extend(sts.spec.selector.clone());
    meta.annotations = sts.spec.template.annotations.clone();
    meta.annotations.insert(TEMPLATE_HASH_ANNOTATION.to_string(), template_hash(&sts.spec.template));
    meta.owner_references.push(OwnerReference::controller_of(Kind::StatefulSet, sts.metadata.name.clone(), sts.metadata.uid.clone()));

    let pod: Pod = Object::new(Kind::Pod, meta, spec);
    admit_and_create_pod(store, pipeline, pod).await
}

async fn ensure_pvc(store: &FileObjectStore, pipeline: &Pipeline, sts: &StatefulSet, ordinal: u32, template: &kos_core::kinds::workloads::VolumeClaimTemplate) -> Result<(), Error> {
    let name = format!("{}-{}", template.name, pod_name(sts, ordinal));
    if store.exists(Kind::PersistentVolumeClaim, sts.metadata.namespace.as_deref(), &name).await {
        return Ok(());
    }
    let access_modes = template
        .access_modes
        .iter()
        .filter_map(|m| match m.as_str() {
            "ReadWriteOnce" => Some(AccessMode::ReadWriteOnce),
            "ReadOnlyMany" => Some(AccessMode::ReadOnlyMany),
            "ReadWriteMany" => Some(AccessMode::ReadWriteMany),
            _ => None,
        })
        .collect::<Vec<_>>();
    let spec = PersistentVolumeClaimSpec {
        requests_storage: template.storage.clone(),
        access_modes: if access_modes.is_empty() { vec![AccessMode::ReadWriteOnce] } else { access_modes },
        storage_class: template.storage_class.clone(),
        volume_name: None,
        volume_mode: VolumeMode::Filesystem,
    };
    let mut meta = ObjectMeta::new(name, sts.metadata.namespace.clone());
    meta.owner_references.push(OwnerReference::controller_of(Kind::StatefulSet, sts.metadata.name.clone(), sts.metadata.uid.clone()));
    let pvc: PersistentVolumeClaim = Object::new(Kind::PersistentVolumeClaim, meta, spec);
    pipeline.admit_pvc(&pvc, Operation::Create).await?;
    match store.create(pvc).await {
        Ok(_) | Err(Error::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// `RollingUpdate` with `partition P`: ordinals `>= P` are re-created on
/// template change, highest ordinal first, one at a time under
/// OrderedReady.
async fn roll_partition(store: &FileObjectStore, sts: &StatefulSet, pods: &BTreeMap<u32, Pod>) -> Result<(), Error> {
    let target_hash = template_hash(&sts.spec.template);
    let mut stale: Vec<u32> = pods
        .iter()
        .filter(|(&ordinal, pod)| ordinal >= sts.spec.partition && pod.metadata.annotations.get(TEMPLATE_HASH_ANNOTATION) != Some(&target_hash))
        .map(|(&o, _)| o)
        .collect();
    stale.sort_unstable_by(|a, b| b.cmp(a));

    let Some(&ordinal) = stale.first() else { return Ok(()) };
    store.delete(Kind::Pod, sts.metadata.namespace.as_deref(), &pod_name(sts, ordinal)).await.ok();
    debug!(statefulset = %sts.metadata.name, ordinal, "recreating stale ordinal for rolling update");
    Ok(())
}

async fn update_status(store: &FileObjectStore, sts: &StatefulSet, pods: &BTreeMap<u32, Pod>) -> Result<(), Error> {
    let replicas = pods.len() as u32;
    let ready_replicas = pods.values().filter(|p| p.status.all_containers_ready()).count() as u32;
    if sts.status.replicas == replicas && sts.status.ready_replicas == ready_replicas {
        return Ok(());
    }
    let mut updated = sts.clone();
    updated.status.replicas = replicas;
    updated.status.ready_replicas = ready_replicas;
    match store.update(updated).await {
        Ok(_) => Ok(()),
        Err(Error::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Component for StatefulSetController {
    fn name(&self) -> &'static str {
        "statefulset-controller"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let pipeline = self.pipeline.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATEFULSET_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store, &pipeline).await {
                            error!(error = %e, "statefulset reconcile tick failed");
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
    use kos_core::kinds::workloads::StatefulSetSpec;

    async fn store() -> (FileObjectStore, Pipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path());
        let ns: Namespace = Object::new(Kind::Namespace, ObjectMeta::new("default", None), Default::default());
        store.create(ns).await.unwrap();
        let pipeline = Pipeline::new(Vec::new(), store.clone());
        (store, pipeline, dir)
    }

    fn sts(name: &str, replicas: u32) -> StatefulSet {
        let mut spec = StatefulSetSpec { replicas, service_name: "web".into(), ..Default::default() };
        spec.selector.insert("app".into(), name.to_string());
        spec.template.labels.insert("app".into(), name.to_string());
        Object::new(Kind::StatefulSet, ObjectMeta::new(name, Some("default".into())), spec)
    }

    #[tokio::test]
    async fn ordered_ready_creates_one_ordinal_per_tick() {
        let (store, pipeline, _dir) = store().await;
        let set = store.create(sts("web", 3)).await.unwrap();

        reconcile_one(&store, &pipeline, &set).await.unwrap();

        let pods: Vec<Pod> = store.list(Kind::Pod, Some("default"), None).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].metadata.name, "web-0");
        assert_eq!(pods[0].spec.hostname.as_deref(), Some("web-0"));
        assert_eq!(pods[0].spec.subdomain.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn ordered_ready_waits_for_previous_ordinal_before_advancing() {
        let (store, pipeline, _dir) = store().await;
        let set = store.create(sts("db", 3)).await.unwrap();

        reconcile_one(&store, &pipeline, &set).await.unwrap();
        let pods: Vec<Pod> = store.list(Kind::Pod, Some("default"), None).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].metadata.name, "db-0");

        // db-0 is still Pending (not Ready): a second tick must not create db-1.
        reconcile_one(&store, &pipeline, &set).await.unwrap();
        let pods: Vec<Pod> = store.list(Kind::Pod, Some("default"), None).await.unwrap();
        assert_eq!(pods.len(), 1, "db-1 must not be created while db-0 is not Ready");

        // Once db-0 becomes Ready, the next tick creates db-1.
        let mut db0: Pod = store.get(Kind::Pod, Some("default"), "db-0").await.unwrap();
        db0.status.container_statuses = vec![kos_core::kinds::pod::ContainerStatus {
            name: "ready".into(),
            state: kos_core::kinds::pod::ContainerState::Running,
            ready: true,
            restart_count: 0,
            exit_code: None,
        }];
        store.update(db0).await.unwrap();

        reconcile_one(&store, &pipeline, &set).await.unwrap();
        let pods: Vec<Pod> = store.list(Kind::Pod, Some("default"), None).await.unwrap();
        assert_eq!(pods.len(), 2, "db-1 should be created once db-0 is Ready");
        assert!(pods.iter().any(|p| p.metadata.name == "db-1"));
    }

    #[tokio::test]
    async fn parallel_policy_creates_all_missing_ordinals() {
        let (store, pipeline, _dir) = store().await;
        let mut set = sts("web", 3);
        set.spec.pod_management_policy = PodManagementPolicy::Parallel;
        let set = store.create(set).await.unwrap();

        reconcile_one(&store, &pipeline, &set).await.unwrap();

        let pods: Vec<Pod> = store.list(Kind::Pod, Some("default"), None).await.unwrap();
        assert_eq!(pods.len(), 3);
    }
}
