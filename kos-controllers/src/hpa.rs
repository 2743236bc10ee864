//! HPA Controller (spec component N). Scales a Deployment/StatefulSet/
//! ReplicaSet from per-Pod resource metrics. The metrics themselves come
//! from a `MetricsSource` the controller is handed at construction —
//! the process/host collector that actually samples cpu/memory is an
//! external data source, not reconciled here.

use std::sync::Arc;

use async_trait::async_trait;
use kos_core::kinds::hpa::{HorizontalPodAutoscaler, MetricResourceName, MetricTargetType};
use kos_core::kinds::pod::Pod;
use kos_core::kinds::workloads::{Deployment, ReplicaSet, StatefulSet};
use kos_core::{selector, Error, Kind};
use kos_store::FileObjectStore;
use tracing::{debug, error};

use crate::cadence::HPA_INTERVAL;
use crate::component::{Component, LoopHandle};

/// Per-Pod resource sampling, supplied by the host metrics collector.
/// Utilization metrics are percentage points (0-100+); AverageValue
/// metrics are in the resource's native unit (millicores, bytes).
pub trait MetricsSource: Send + Sync {
    fn sample(&self, pod: &Pod, resource: MetricResourceName, target_type: MetricTargetType) -> Option<f64>;
}

/// Used where no metrics collector is wired up; HPAs using it never scale.
pub struct NullMetricsSource;

impl MetricsSource for NullMetricsSource {
    fn sample(&self, _pod: &Pod, _resource: MetricResourceName, _target_type: MetricTargetType) -> Option<f64> {
        None
    }
}

pub struct HpaController {
    store: FileObjectStore,
    metrics: Arc<dyn MetricsSource>,
    loop_handle: LoopHandle,
}

impl HpaController {
    pub fn new(store: FileObjectStore, metrics: Arc<dyn MetricsSource>) -> Self {
        HpaController { store, metrics, loop_handle: LoopHandle::new() }
    }
}

struct TargetView {
    replicas: u32,
    selector: std::collections::HashMap<String, String>,
}

async fn resolve_target(store: &FileObjectStore, hpa: &HorizontalPodAutoscaler) -> Result<Option<TargetView>, Error> {
    let ns = hpa.metadata.namespace.as_deref();
    let name = &hpa.spec.scale_target_ref.name;
    match hpa.spec.scale_target_ref.kind {
        Kind::Deployment => {
            let d: Deployment = store.get(Kind::Deployment, ns, name).await?;
            Ok(Some(TargetView { replicas: d.status.replicas, selector: d.spec.selector }))
        }
        Kind::StatefulSet => {
            let s: StatefulSet = store.get(Kind::StatefulSet, ns, name).await?;
            Ok(Some(TargetView { replicas: s.status.replicas, selector: s.spec.selector }))
        }
        Kind::ReplicaSet => {
            let r: ReplicaSet = store.get(Kind::ReplicaSet, ns, name).await?;
            Ok(Some(TargetView { replicas: r.status.replicas, selector: r.spec.selector }))
        }
        _ => Ok(None),
    }
}

async fn scale_target(store: &FileObjectStore, hpa: &HorizontalPodAutoscaler, replicas: u32) -> Result<(), Error> {
    let ns = hpa.metadata.namespace.as_deref();
    let name = &hpa.spec.scale_target_ref.name;
    match hpa.spec.scale_target_ref.kind {
        Kind::Deployment => {
            let mut d: Deployment = store.get(Kind::Deployment, ns, name).await?;
            d.spec.replicas = replicas;
            store.update(d).await?;
        }
        Kind::StatefulSet => {
            let mut s: StatefulSet = store.get(Kind::StatefulSet, ns, name).await?;
            s.spec.replicas = replicas;
            store.update(s).await?;
        }
        Kind::ReplicaSet => {
            let mut r: ReplicaSet = store.get(Kind::ReplicaSet, ns, name).await?;
            r.spec.replicas = replicas;
            store.update(r).await?;
        }
        _ => {}
    }
    Ok(())
}

async fn reconcile_tick(store: &FileObjectStore, metrics: &dyn MetricsSource) -> Result<(), Error> {
    let hpas: Vec<HorizontalPodAutoscaler> = store.list(Kind::HorizontalPodAutoscaler, None, None).await?;
    for hpa in hpas {
        if let Err(e) = reconcile_one(store, metrics, &hpa).await {
            error!(hpa = %hpa.metadata.name, error = %e, "hpa reconcile failed");
        }
    }
    Ok(())
}

async fn reconcile_one(store: &FileObjectStore, metrics: &dyn MetricsSource, hpa: &HorizontalPodAutoscaler) -> Result<(), Error> {
    let Some(target) = resolve_target(store, hpa).await? else {
        debug!(hpa = %hpa.metadata.name, "scale target not found");
        return Ok(());
    };

    if target.replicas == 0 {
        return Ok(());
    }

    let pods: Vec<Pod> = store.list(Kind::Pod, hpa.metadata.namespace.as_deref(), None).await?;
    let matched: Vec<&Pod> = pods.iter().filter(|p| selector::matches_nonempty(&target.selector, &p.metadata.labels)).collect();

    let mut current_metrics = Vec::new();
    let mut desired = target.replicas;
    for metric in &hpa.spec.metrics {
        let samples: Vec<f64> = matched.iter().filter_map(|p| metrics.sample(p, metric.resource_name, metric.target_type)).collect();
        if samples.is_empty() {
            continue;
        }
        let average = samples.iter().sum::<f64>() / samples.len() as f64;
        current_metrics.push(average);
        let ratio = average / metric.target_value;
        let metric_replicas = (target.replicas as f64 * ratio).ceil() as u32;
        desired = desired.max(metric_replicas);
    }

    let clamped = desired.clamp(hpa.spec.min_replicas, hpa.spec.max_replicas);
    let stabilized = apply_stabilization(hpa, target.replicas, clamped);

    let mut updated = hpa.clone();
    updated.status.current_replicas = target.replicas;
    updated.status.desired_replicas = stabilized;
    updated.status.current_metrics = current_metrics;

    if stabilized != target.replicas {
        scale_target(store, hpa, stabilized).await?;
        let now = chrono::Utc::now();
        updated.status.last_scale_time = Some(now);
        if stabilized > target.replicas {
            updated.status.last_scale_up_time = Some(now);
        } else {
            updated.status.last_scale_down_time = Some(now);
        }
    }

    match store.update(updated).await {
        Ok(_) => Ok(()),
        Err(Error::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

fn apply_stabilization(hpa: &HorizontalPodAutoscaler, current: u32, desired: u32) -> u32 {
    let now = chrono::Utc::now();
    if desired > current {
        if let Some(last_up) = hpa.status.last_scale_up_time {
            let window = chrono::Duration::seconds(hpa.spec.stabilization.scale_up_seconds);
            if window > chrono::Duration::zero() && now - last_up < window {
                return current;
            }
        }
    } else if desired < current {
        if let Some(last_down) = hpa.status.last_scale_down_time {
            let window = chrono::Duration::seconds(hpa.spec.stabilization.scale_down_seconds);
            if window > chrono::Duration::zero() && now - last_down < window {
                return current;
            }
        }
    }
    desired
}

#[async_trait]
impl Component for HpaController {
    fn name(&self) -> &'static str {
        "hpa-controller"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HPA_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store, metrics.as_ref()).await {
                            error!(error = %e, "hpa reconcile tick failed");
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
    use kos_core::kinds::hpa::{HpaSpec, MetricSpec, ScaleTargetRef, StabilizationWindows};
    use kos_core::kinds::workloads::{DeploymentSpec, DeploymentStatus};
    use kos_core::{Object, ObjectMeta};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    struct FixedMetrics(f64);
    impl MetricsSource for FixedMetrics {
        fn sample(&self, _pod: &Pod, _resource: MetricResourceName, _target_type: MetricTargetType) -> Option<f64> {
            Some(self.0)
        }
    }

    fn deployment_with_status(name: &str, replicas: u32) -> Deployment {
        let mut d: Deployment = Object::new(Kind::Deployment, ObjectMeta::new(name, Some("default".into())), DeploymentSpec::default());
        d.spec.selector.insert("app".into(), name.to_string());
        d.status = DeploymentStatus { replicas, ..Default::default() };
        d
    }

    fn hpa(target: &str, min: u32, max: u32) -> HorizontalPodAutoscaler {
        let spec = HpaSpec {
            scale_target_ref: ScaleTargetRef { kind: Kind::Deployment, name: target.into() },
            min_replicas: min,
            max_replicas: max,
            metrics: vec![MetricSpec { resource_name: MetricResourceName::Cpu, target_type: MetricTargetType::Utilization, target_value: 50.0 }],
            stabilization: StabilizationWindows::default(),
        };
        Object::new(Kind::HorizontalPodAutoscaler, ObjectMeta::new("web-hpa", Some("default".into())), spec)
    }

    #[tokio::test]
    async fn scales_up_when_utilization_exceeds_target() {
        let (store, _dir) = store();
        store.create(deployment_with_status("web", 2)).await.unwrap();
        let h = store.create(hpa("web", 1, 10)).await.unwrap();

        reconcile_one(&store, &FixedMetrics(100.0), &h).await.unwrap();

        let updated: HorizontalPodAutoscaler = store.get(Kind::HorizontalPodAutoscaler, Some("default"), "web-hpa").await.unwrap();
        assert_eq!(updated.status.desired_replicas, 4);
    }

    #[tokio::test]
    async fn clamps_to_max_replicas() {
        let (store, _dir) = store();
        store.create(deployment_with_status("web", 2)).await.unwrap();
        let h = store.create(hpa("web", 1, 3)).await.unwrap();

        reconcile_one(&store, &FixedMetrics(500.0), &h).await.unwrap();

        let updated: HorizontalPodAutoscaler = store.get(Kind::HorizontalPodAutoscaler, Some("default"), "web-hpa").await.unwrap();
        assert_eq!(updated.status.desired_replicas, 3);
    }

    #[tokio::test]
    async fn no_metrics_leaves_replicas_unchanged() {
        let (store, _dir) = store();
        store.create(deployment_with_status("web", 2)).await.unwrap();
        let h = store.create(hpa("web", 1, 10)).await.unwrap();

        reconcile_one(&store, &NullMetricsSource, &h).await.unwrap();

        let updated: HorizontalPodAutoscaler = store.get(Kind::HorizontalPodAutoscaler, Some("default"), "web-hpa").await.unwrap();
        assert_eq!(updated.status.desired_replicas, 2);
    }
}
