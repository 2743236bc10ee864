//! Quota Controller (spec component G). Maintains per-namespace usage and
//! gates Pod admission against `ResourceQuota.spec.hard`.

use std::collections::HashMap;

use async_trait::async_trait;
use kos_core::kinds::pod::{Pod, PodPhase};
use kos_core::kinds::quota::{ResourceQuota, QUOTA_LIMITS_CPU, QUOTA_LIMITS_MEMORY, QUOTA_PODS, QUOTA_REQUESTS_CPU, QUOTA_REQUESTS_MEMORY};
use kos_core::{quantity, Error, Kind};
use kos_store::FileObjectStore;
use tracing::error;

use crate::cadence::QUOTA_RECONCILE_INTERVAL;
use crate::component::{Component, LoopHandle};

pub struct QuotaController {
    store: FileObjectStore,
    loop_handle: LoopHandle,
}

impl QuotaController {
    pub fn new(store: FileObjectStore) -> Self {
        QuotaController { store, loop_handle: LoopHandle::new() }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    pods: i64,
    requests_cpu_millis: i64,
    requests_memory_bytes: i64,
    limits_cpu_millis: i64,
    limits_memory_bytes: i64,
}

impl Usage {
    fn add(&mut self, pod: &Pod) {
        self.pods += 1;
        for c in &pod.spec.containers {
            if let Some(v) = &c.resources.requests.cpu {
                self.requests_cpu_millis += quantity::parse_cpu(v).unwrap_or(0);
            }
            if let Some(v) = &c.resources.requests.memory {
                self.requests_memory_bytes += quantity::parse_memory(v).unwrap_or(0);
            }
            if let Some(v) = &c.resources.limits.cpu {
                self.limits_cpu_millis += quantity::parse_cpu(v).unwrap_or(0);
            }
            if let Some(v) = &c.resources.limits.memory {
                self.limits_memory_bytes += quantity::parse_memory(v).unwrap_or(0);
            }
        }
    }

    fn as_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert(QUOTA_PODS.to_string(), self.pods.to_string());
        m.insert(QUOTA_REQUESTS_CPU.to_string(), quantity::format_cpu(self.requests_cpu_millis));
        m.insert(QUOTA_REQUESTS_MEMORY.to_string(), quantity::format_memory(self.requests_memory_bytes));
        m.insert(QUOTA_LIMITS_CPU.to_string(), quantity::format_cpu(self.limits_cpu_millis));
        m.insert(QUOTA_LIMITS_MEMORY.to_string(), quantity::format_memory(self.limits_memory_bytes));
        m
    }
}

fn namespace_usage(pods: &[Pod]) -> Usage {
    let mut usage = Usage::default();
    for pod in pods {
        if matches!(pod.status.phase, PodPhase::Running | PodPhase::Pending) {
            usage.add(pod);
        }
    }
    usage
}

async fn reconcile_tick(store: &FileObjectStore) -> Result<(), Error> {
    let quotas: Vec<ResourceQuota> = store.list(Kind::ResourceQuota, None, None).await?;
    let mut by_namespace: HashMap<String, Vec<ResourceQuota>> = HashMap::new();
    for q in quotas {
        by_namespace.entry(q.metadata.namespace.clone().unwrap_or_default()).or_default().push(q);
    }

    for (namespace, quotas) in by_namespace {
        let pods: Vec<Pod> = store.list(Kind::Pod, Some(&namespace), None).await?;
        let usage = namespace_usage(&pods);
        for quota in quotas {
            let mut updated = quota.clone();
            updated.status.hard = quota.spec.hard.clone();
            updated.status.used = usage.as_map();
            if updated.status != quota.status {
                if let Err(e) = store.update(updated).await {
                    if !matches!(e, Error::Conflict { .. }) {
                        error!(namespace, error = %e, "failed to update quota status");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Computes what the namespace's usage would become if `candidate` were
/// admitted, and checks it against every quota's `spec.hard`. Called by
/// the admission path before a Pod write is accepted.
pub async fn check_admission(store: &FileObjectStore, namespace: &str, candidate: &Pod) -> Result<(), Error> {
    let quotas: Vec<ResourceQuota> = store.list(Kind::ResourceQuota, Some(namespace), None).await?;
    if quotas.is_empty() {
        return Ok(());
    }
    let existing: Vec<Pod> = store.list(Kind::Pod, Some(namespace), None).await?;
    let mut trial = namespace_usage(&existing);
    trial.add(candidate);
    let trial_map = trial.as_map();

    for quota in &quotas {
        for (resource, hard_raw) in &quota.spec.hard {
            let Some(used_raw) = trial_map.get(resource) else { continue };
            let (hard, used) = match resource.as_str() {
                QUOTA_PODS => (hard_raw.parse::<i64>().unwrap_or(i64::MAX), used_raw.parse::<i64>().unwrap_or(0)),
                QUOTA_REQUESTS_CPU | QUOTA_LIMITS_CPU => (quantity::parse_cpu(hard_raw).unwrap_or(i64::MAX), quantity::parse_cpu(used_raw).unwrap_or(0)),
                QUOTA_REQUESTS_MEMORY | QUOTA_LIMITS_MEMORY => (quantity::parse_memory(hard_raw).unwrap_or(i64::MAX), quantity::parse_memory(used_raw).unwrap_or(0)),
                _ => continue,
            };
            if used > hard {
                return Err(Error::Quota(format!("{resource} would exceed hard limit {hard_raw} in namespace {namespace}")));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Component for QuotaController {
    fn name(&self) -> &'static str {
        "quota-controller"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(QUOTA_RECONCILE_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store).await {
                            error!(error = %e, "quota reconcile failed");
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
    use kos_core::kinds::pod::{Container, PodSpec, ResourceList, ResourceRequirements};
    use kos_core::kinds::quota::ResourceQuotaSpec;
    use kos_core::{Object, ObjectMeta};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    fn pod_with_cpu(name: &str, cpu: &str) -> Pod {
        let mut pod: Pod = Object::new(Kind::Pod, ObjectMeta::new(name, Some("default".into())), PodSpec::default());
        pod.spec.containers.push(Container {
            name: "c".into(),
            image: "nginx".into(),
            command: vec![],
            env: Default::default(),
            ports: vec![],
            volume_mounts: vec![],
            resources: ResourceRequirements { requests: ResourceList { cpu: Some(cpu.to_string()), memory: None }, limits: Default::default() },
        });
        pod.status.phase = PodPhase::Pending;
        pod
    }

    #[tokio::test]
    async fn third_pod_rejected_when_hard_pods_is_two() {
        let (store, _dir) = store();
        let mut quota: ResourceQuota = Object::new(Kind::ResourceQuota, ObjectMeta::new("q", Some("default".into())), ResourceQuotaSpec::default());
        quota.spec.hard.insert(QUOTA_PODS.to_string(), "2".to_string());
        store.create(quota).await.unwrap();

        store.create(pod_with_cpu("p1", "100m")).await.unwrap();
        store.create(pod_with_cpu("p2", "100m")).await.unwrap();

        let candidate = pod_with_cpu("p3", "100m");
        let result = check_admission(&store, "default", &candidate).await;
        assert!(matches!(result, Err(Error::Quota(_))));
    }

    #[tokio::test]
    async fn reconcile_tick_writes_used_pods_count() {
        let (store, _dir) = store();
        let quota: ResourceQuota = Object::new(Kind::ResourceQuota, ObjectMeta::new("q", Some("default".into())), ResourceQuotaSpec::default());
        store.create(quota).await.unwrap();
        store.create(pod_with_cpu("p1", "100m")).await.unwrap();

        reconcile_tick(&store).await.unwrap();

        let updated: ResourceQuota = store.get(Kind::ResourceQuota, Some("default"), "q").await.unwrap();
        assert_eq!(updated.status.used[QUOTA_PODS], "1");
    }
}
