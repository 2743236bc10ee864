//! Shared create-path gate for every controller that mints a Pod
//! (ReplicaSet, StatefulSet, Job). Admission and quota must run on every
//! Pod before it reaches the store; controllers call this instead of
//! `store.create` directly so neither check can be skipped by a new call
//! site.
//!
//! `kos-admission` has no dependency back on this crate, so depending on
//! it here does not create a cycle — only the reverse direction would
//! (`kos-admission` would need `quota::check_admission`, which lives
//! here).

use kos_admission::{Operation, Pipeline};
use kos_core::kinds::pod::Pod;
use kos_core::Error;
use kos_store::FileObjectStore;

use crate::quota;

pub async fn admit_and_create_pod(store: &FileObjectStore, pipeline: &Pipeline, pod: Pod) -> Result<Pod, Error> {
    pipeline.admit_pod(&pod, Operation::Create).await?;
    let namespace = pod.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    quota::check_admission(store, &namespace, &pod).await?;
    store.create(pod).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kos_core::kinds::namespace::Namespace;
    use kos_core::kinds::quota::{ResourceQuota, ResourceQuotaSpec, QUOTA_PODS};
    use kos_core::{Kind, Object, ObjectMeta};

    fn pod(name: &str) -> Pod {
        Object::new(Kind::Pod, ObjectMeta::new(name, Some("default".into())), Default::default())
    }

    #[tokio::test]
    async fn third_pod_rejected_end_to_end_through_admission_and_quota() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path());
        let ns: Namespace = Object::new(Kind::Namespace, ObjectMeta::new("default", None), Default::default());
        store.create(ns).await.unwrap();
        let mut quota: ResourceQuota = Object::new(Kind::ResourceQuota, ObjectMeta::new("q", Some("default".into())), ResourceQuotaSpec::default());
        quota.spec.hard.insert(QUOTA_PODS.to_string(), "2".to_string());
        store.create(quota).await.unwrap();
        let pipeline = Pipeline::new(Vec::new(), store.clone());

        admit_and_create_pod(&store, &pipeline, pod("p1")).await.unwrap();
        admit_and_create_pod(&store, &pipeline, pod("p2")).await.unwrap();

        let err = admit_and_create_pod(&store, &pipeline, pod("p3")).await.unwrap_err();
        assert!(matches!(err, Error::Quota(_)));
    }
}
