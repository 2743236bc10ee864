//! DNS Zone (spec component F). Derives A/AAAA/SRV/TXT records from
//! Services and Pods and refreshes them on a timer. The zone is data
//! the core maintains; serving it over the wire is an external
//! collaborator per the scope note, so this only exposes `records()`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kos_core::kinds::pod::Pod;
use kos_core::kinds::service::{Service, ServiceType, TargetPort};
use kos_core::{Error, Kind};
use kos_store::FileObjectStore;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::cadence::{DNS_DEFAULT_TTL_SECONDS, DNS_REFRESH_INTERVAL};
use crate::component::{Component, LoopHandle};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Srv,
    Cname,
    Txt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: RecordType,
    pub value: String,
    pub ttl: u32,
}

pub struct DnsZone {
    store: FileObjectStore,
    domain: String,
    records: Arc<RwLock<HashMap<String, Vec<DnsRecord>>>>,
    loop_handle: LoopHandle,
}

impl DnsZone {
    pub fn new(store: FileObjectStore, domain: impl Into<String>) -> Self {
        DnsZone { store, domain: domain.into(), records: Arc::new(RwLock::new(HashMap::new())), loop_handle: LoopHandle::new() }
    }

    pub async fn records(&self) -> HashMap<String, Vec<DnsRecord>> {
        self.records.read().await.clone()
    }
}

async fn refresh(store: &FileObjectStore, domain: &str, records: &RwLock<HashMap<String, Vec<DnsRecord>>>) -> Result<(), Error> {
    let services: Vec<Service> = store.list(Kind::Service, None, None).await?;
    let mut fresh: HashMap<String, Vec<DnsRecord>> = HashMap::new();

    for service in &services {
        let ns = service.metadata.namespace.clone().unwrap_or_default();
        let svc_fqdn = format!("{}.{ns}.svc.{domain}", service.metadata.name);

        if service.spec.service_type == ServiceType::ExternalName {
            if let Some(target) = &service.spec.external_name {
                fresh.entry(svc_fqdn.clone()).or_default().push(DnsRecord {
                    name: svc_fqdn,
                    record_type: RecordType::Cname,
                    value: target.clone(),
                    ttl: DNS_DEFAULT_TTL_SECONDS,
                });
            }
            continue;
        }

        let Some(cluster_ip) = &service.spec.cluster_ip else { continue };
        fresh.entry(svc_fqdn.clone()).or_default().push(DnsRecord {
            name: svc_fqdn.clone(),
            record_type: RecordType::A,
            value: cluster_ip.clone(),
            ttl: DNS_DEFAULT_TTL_SECONDS,
        });
        fresh.entry(svc_fqdn.clone()).or_default().push(DnsRecord {
            name: svc_fqdn.clone(),
            record_type: RecordType::Txt,
            value: format!("name={} namespace={ns} uid={}", service.metadata.name, service.metadata.uid),
            ttl: DNS_DEFAULT_TTL_SECONDS,
        });

        let pods: Vec<Pod> = store.list(Kind::Pod, Some(&ns), None).await?;
        let matching: Vec<&Pod> = pods
            .iter()
            .filter(|p| p.status.is_running() && kos_core::selector::matches_nonempty(&service.spec.selector, &p.metadata.labels))
            .collect();

        for port in &service.spec.ports {
            let srv_name = format!("_{}._tcp.{svc_fqdn}", port.name);
            for pod in &matching {
                let Some(pod_ip) = &pod.status.pod_ip else { continue };
                let Some(target_port) = resolve_port(pod, &port.target_port) else { continue };
                let pod_fqdn = format!("{}.{ns}.pod.{domain}", pod_ip.replace('.', "-"));
                fresh.entry(srv_name.clone()).or_default().push(DnsRecord {
                    name: srv_name.clone(),
                    record_type: RecordType::Srv,
                    value: format!("0 10 {target_port} {pod_fqdn}"),
                    ttl: DNS_DEFAULT_TTL_SECONDS,
                });
            }
        }

        for pod in &matching {
            let Some(pod_ip) = &pod.status.pod_ip else { continue };
            let pod_fqdn = format!("{}.{ns}.pod.{domain}", pod.metadata.name);
            fresh.entry(pod_fqdn.clone()).or_default().push(DnsRecord { name: pod_fqdn, record_type: RecordType::A, value: pod_ip.clone(), ttl: DNS_DEFAULT_TTL_SECONDS });

            if let (Some(hostname), Some(subdomain)) = (&pod.spec.hostname, &pod.spec.subdomain) {
                let name = format!("{hostname}.{subdomain}.{ns}.svc.{domain}");
                fresh.entry(name.clone()).or_default().push(DnsRecord { name, record_type: RecordType::A, value: pod_ip.clone(), ttl: DNS_DEFAULT_TTL_SECONDS });
            }
        }
    }

    *records.write().await = fresh;
    Ok(())
}

fn resolve_port(pod: &Pod, target: &TargetPort) -> Option<u16> {
    match target {
        TargetPort::Number(n) => Some(*n),
        TargetPort::Named(name) => pod.spec.containers.iter().flat_map(|c| &c.ports).find(|p| p.name.as_deref() == Some(name.as_str())).map(|p| p.container_port),
    }
}

#[async_trait]
impl Component for DnsZone {
    fn name(&self) -> &'static str {
        "dns-zone"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let domain = self.domain.clone();
        let records = self.records.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(DNS_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = refresh(&store, &domain, &records).await {
                            error!(error = %e, "dns refresh failed");
                        } else {
                            debug!("dns zone refreshed");
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
    use kos_core::kinds::service::{ServicePort, ServiceSpec};
    use kos_core::{Object, ObjectMeta};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn service_gets_a_and_txt_records() {
        let (store, _dir) = store();
        let mut svc: Service = Object::new(Kind::Service, ObjectMeta::new("web", Some("default".into())), ServiceSpec::default());
        svc.spec.cluster_ip = Some("10.96.0.5".into());
        svc.spec.ports.push(ServicePort { name: "http".into(), port: 80, target_port: TargetPort::Number(8080), node_port: None, protocol: Default::default() });
        store.create(svc).await.unwrap();

        let records = Arc::new(RwLock::new(HashMap::new()));
        refresh(&store, "cluster.local", &records).await.unwrap();

        let zone = records.read().await;
        let entries = &zone["web.default.svc.cluster.local"];
        assert!(entries.iter().any(|r| r.record_type == RecordType::A && r.value == "10.96.0.5"));
        assert!(entries.iter().any(|r| r.record_type == RecordType::Txt));
    }

    #[tokio::test]
    async fn removed_service_drops_its_records_next_refresh() {
        let (store, _dir) = store();
        let mut svc: Service = Object::new(Kind::Service, ObjectMeta::new("web", Some("default".into())), ServiceSpec::default());
        svc.spec.cluster_ip = Some("10.96.0.5".into());
        store.create(svc).await.unwrap();

        let records = Arc::new(RwLock::new(HashMap::new()));
        refresh(&store, "cluster.local", &records).await.unwrap();
        assert!(records.read().await.contains_key("web.default.svc.cluster.local"));

        store.delete(Kind::Service, Some("default"), "web").await.unwrap();
        refresh(&store, "cluster.local", &records).await.unwrap();
        assert!(records.read().await.is_empty());
    }
}
