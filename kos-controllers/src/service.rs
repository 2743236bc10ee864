//! Service & Endpoints controller (spec component E). Allocates
//! clusterIP/nodePort/externalIP on Service create and recomputes
//! Endpoints on every Service/Pod change.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use kos_core::kinds::pod::{Pod, PodPhase};
use kos_core::kinds::service::{Endpoints, EndpointAddress, Service, ServiceType, TargetPort};
use kos_core::{selector, Error, Kind};
use kos_store::FileObjectStore;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::cadence::SERVICE_ENDPOINTS_INTERVAL;
use crate::component::{Component, LoopHandle};
use crate::ipam::{self, Cidr};

pub struct ServiceController {
    store: FileObjectStore,
    cluster_cidr: Cidr,
    external_cidr: Option<Cidr>,
    endpoints: Arc<RwLock<HashMap<String, Endpoints>>>,
    loop_handle: LoopHandle,
}

fn endpoints_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

impl ServiceController {
    pub fn new(store: FileObjectStore, cluster_cidr: &str, external_cidr: Option<&str>) -> Self {
        ServiceController {
            store,
            cluster_cidr: Cidr::parse(cluster_cidr).expect("valid cluster service CIDR"),
            external_cidr: external_cidr.map(|c| Cidr::parse(c).expect("valid external CIDR")),
            endpoints: Arc::new(RwLock::new(HashMap::new())),
            loop_handle: LoopHandle::new(),
        }
    }

    /// The Endpoints last computed for one Service, as of the most recent
    /// reconcile tick.
    pub async fn endpoints_for(&self, namespace: &str, name: &str) -> Option<Endpoints> {
        self.endpoints.read().await.get(&endpoints_key(namespace, name)).cloned()
    }
}

async fn reconcile_tick(
    store: &FileObjectStore,
    cluster_cidr: &Cidr,
    external_cidr: &Option<Cidr>,
    endpoints: &RwLock<HashMap<String, Endpoints>>,
) -> Result<(), Error> {
    let services: Vec<Service> = store.list(Kind::Service, None, None).await?;
    allocate_unassigned(store, &services, cluster_cidr, external_cidr).await?;
    refresh_endpoints(store, &services, endpoints).await
}

/// Recomputes Endpoints for every Service and drops entries for Services
/// that no longer exist, per spec §4.E's "recomputed on every Service/Pod
/// change".
async fn refresh_endpoints(store: &FileObjectStore, services: &[Service], endpoints: &RwLock<HashMap<String, Endpoints>>) -> Result<(), Error> {
    let mut fresh = HashMap::new();
    for service in services {
        let ns = service.metadata.namespace.clone().unwrap_or_default();
        let computed = compute_endpoints(store, service, &ns).await?;
        fresh.insert(endpoints_key(&ns, &service.metadata.name), computed);
    }
    *endpoints.write().await = fresh;
    Ok(())
}

async fn allocate_unassigned(
    store: &FileObjectStore,
    services: &[Service],
    cluster_cidr: &Cidr,
    external_cidr: &Option<Cidr>,
) -> Result<(), Error> {
    let mut used_ips: HashSet<String> = services.iter().filter_map(|s| s.spec.cluster_ip.clone()).collect();
    let mut used_ports: HashSet<u16> = services
        .iter()
        .flat_map(|s| s.spec.ports.iter().filter_map(|p| p.node_port))
        .collect();
    let mut used_external: HashSet<String> = services.iter().filter_map(|s| s.status.external_ip.clone()).collect();

    for service in services {
        if service.spec.service_type == ServiceType::ExternalName {
            continue;
        }
        let mut updated = service.clone();
        let mut changed = false;

        if updated.spec.cluster_ip.is_none() {
            if let Some(ip) = ipam::lowest_unused_ip(cluster_cidr, &used_ips) {
                used_ips.insert(ip.clone());
                updated.spec.cluster_ip = Some(ip);
                changed = true;
            }
        }

        for port in &mut updated.spec.ports {
            if port.node_port.is_none() && service.spec.service_type == ServiceType::NodePort {
                if let Some(p) = ipam::lowest_unused_node_port(&used_ports) {
                    used_ports.insert(p);
                    port.node_port = Some(p);
                    changed = true;
                }
            }
        }

        if service.spec.service_type == ServiceType::LoadBalancer && updated.status.external_ip.is_none() {
            if let Some(cidr) = external_cidr {
                if let Some(ip) = ipam::lowest_unused_ip(cidr, &used_external) {
                    used_external.insert(ip.clone());
                    updated.status.external_ip = Some(ip);
                    changed = true;
                }
            }
        }

        if changed {
            store.update(updated).await.or_else(|e| if matches!(e, Error::Conflict { .. }) { Ok(service.clone()) } else { Err(e) })?;
        }
    }
    Ok(())
}

/// For each port, the ordered list of (podIP, targetPort) over Pods whose
/// labels contain the selector, phase Running, podIP set. Ordering is pod
/// name ascending.
async fn compute_endpoints(store: &FileObjectStore, service: &Service, namespace: &str) -> Result<Endpoints, Error> {
    if service.spec.service_type == ServiceType::ExternalName {
        return Ok(Endpoints { service_name: service.metadata.name.clone(), namespace: namespace.to_string(), ports: HashMap::new() });
    }

    let mut pods: Vec<Pod> = store.list(Kind::Pod, Some(namespace), None).await?;
    pods.retain(|p| p.status.is_running() && selector::matches_nonempty(&service.spec.selector, &p.metadata.labels));
    pods.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    let mut ports: HashMap<String, Vec<EndpointAddress>> = HashMap::new();
    for port in &service.spec.ports {
        let mut backends = Vec::new();
        for pod in &pods {
            if let Some(target_port) = resolve_named_port(pod, &port.target_port) {
                backends.push(EndpointAddress {
                    pod_name: pod.metadata.name.clone(),
                    pod_ip: pod.status.pod_ip.clone().unwrap_or_default(),
                    target_port,
                    ready: pod.status.all_containers_ready(),
                });
            }
        }
        ports.insert(port.name.clone(), backends);
    }

    Ok(Endpoints { service_name: service.metadata.name.clone(), namespace: namespace.to_string(), ports })
}

fn resolve_named_port(pod: &Pod, target: &TargetPort) -> Option<u16> {
    match target {
        TargetPort::Number(n) => Some(*n),
        TargetPort::Named(name) => pod
            .spec
            .containers
            .iter()
            .flat_map(|c| &c.ports)
            .find(|p| p.name.as_deref() == Some(name.as_str()))
            .map(|p| p.container_port),
    }
}

#[async_trait]
impl Component for ServiceController {
    fn name(&self) -> &'static str {
        "service-controller"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let cluster_cidr = self.cluster_cidr;
        let external_cidr = self.external_cidr;
        let endpoints = self.endpoints.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SERVICE_ENDPOINTS_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store, &cluster_cidr, &external_cidr, &endpoints).await {
                            error!(error = %e, "service reconcile failed");
                        } else {
                            debug!("service reconcile tick complete");
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
    use kos_core::kinds::pod::PodSpec;
    use kos_core::kinds::service::{ServicePort, ServiceSpec};
    use kos_core::{Object, ObjectMeta};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    fn running_pod(name: &str, ip: &str, labels: &[(&str, &str)]) -> Pod {
        let mut pod: Pod = Object::new(Kind::Pod, ObjectMeta::new(name, Some("default".into())), PodSpec::default());
        for (k, v) in labels {
            pod.metadata.labels.insert(k.to_string(), v.to_string());
        }
        pod.status.phase = PodPhase::Running;
        pod.status.pod_ip = Some(ip.to_string());
        pod
    }

    #[tokio::test]
    async fn allocates_cluster_ip_once() {
        let (store, _dir) = store();
        let mut svc: Service = Object::new(Kind::Service, ObjectMeta::new("web", Some("default".into())), ServiceSpec::default());
        svc.spec.selector.insert("app".into(), "web".into());
        store.create(svc).await.unwrap();

        let cidr = Cidr::parse("10.96.0.0/24").unwrap();
        let services: Vec<Service> = store.list(Kind::Service, None, None).await.unwrap();
        allocate_unassigned(&store, &services, &cidr, &None).await.unwrap();

        let updated: Service = store.get(Kind::Service, Some("default"), "web").await.unwrap();
        assert!(updated.spec.cluster_ip.is_some());
    }

    #[tokio::test]
    async fn endpoints_reflect_only_running_matching_pods() {
        let (store, _dir) = store();
        store.create(running_pod("a", "10.1.0.1", &[("app", "web")])).await.unwrap();
        store.create(running_pod("b", "10.1.0.2", &[("app", "other")])).await.unwrap();

        let mut svc: Service = Object::new(Kind::Service, ObjectMeta::new("web", Some("default".into())), ServiceSpec::default());
        svc.spec.selector.insert("app".into(), "web".into());
        svc.spec.ports.push(ServicePort { name: "http".into(), port: 80, target_port: TargetPort::Number(8080), node_port: None, protocol: Default::default() });

        let endpoints = compute_endpoints(&store, &svc, "default").await.unwrap();
        let backends = &endpoints.ports["http"];
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].pod_name, "a");
    }

    #[tokio::test]
    async fn reconcile_tick_populates_the_queryable_endpoints_cache() {
        let (store, _dir) = store();
        store.create(running_pod("a", "10.1.0.1", &[("app", "web")])).await.unwrap();

        let mut svc: Service = Object::new(Kind::Service, ObjectMeta::new("web", Some("default".into())), ServiceSpec::default());
        svc.spec.selector.insert("app".into(), "web".into());
        svc.spec.ports.push(ServicePort { name: "http".into(), port: 80, target_port: TargetPort::Number(8080), node_port: None, protocol: Default::default() });
        store.create(svc).await.unwrap();

        let cidr = Cidr::parse("10.96.0.0/24").unwrap();
        let endpoints = Arc::new(RwLock::new(HashMap::new()));
        reconcile_tick(&store, &cidr, &None, &endpoints).await.unwrap();

        let controller = ServiceController { store, cluster_cidr: cidr, external_cidr: None, endpoints, loop_handle: LoopHandle::new() };
        let cached = controller.endpoints_for("default", "web").await.unwrap();
        assert_eq!(cached.ports["http"].len(), 1);

        assert!(controller.endpoints_for("default", "missing").await.is_none());
    }
}
