//! Scheduler (spec component D): filter/score/select/bind pipeline that
//! assigns Pending Pods with no `status.hostIP` to a feasible Node.

use std::collections::HashMap;

use async_trait::async_trait;
use kos_core::kinds::event::{EventType, InvolvedObjectRef};
use kos_core::kinds::node::{Node, NodeConditionType, TaintEffect};
use kos_core::kinds::pod::{Pod, PodPhase};
use kos_core::{selector, Error, Kind};
use kos_store::FileObjectStore;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::cadence::SCHEDULER_INTERVAL;
use crate::component::{Component, LoopHandle};
use crate::events;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    Spread,
    BinPack,
    RoundRobin,
    Random,
    Custom,
}

pub struct Scheduler {
    store: FileObjectStore,
    policy: SchedulerPolicy,
    loop_handle: LoopHandle,
}

impl Scheduler {
    pub fn new(store: FileObjectStore, policy: SchedulerPolicy) -> Self {
        Scheduler { store, policy, loop_handle: LoopHandle::new() }
    }

    pub fn set_policy(&mut self, policy: SchedulerPolicy) {
        self.policy = policy;
    }
}

struct NodeUsage {
    node: Node,
    used_cpu_millis: i64,
    used_memory_bytes: i64,
    pod_count: i64,
}

/// One scheduling cycle over a snapshot of the store, run single-threaded
/// to avoid double-accounting the same Node's capacity across concurrent
/// binds.
async fn schedule_tick(store: &FileObjectStore, policy: SchedulerPolicy) -> Result<(), Error> {
    let nodes: Vec<Node> = store.list(Kind::Node, None, None).await?;
    let all_pods: Vec<Pod> = store.list(Kind::Pod, None, None).await?;

    let mut usage: HashMap<String, NodeUsage> = HashMap::new();
    for node in nodes {
        usage.insert(node.metadata.name.clone(), NodeUsage { node, used_cpu_millis: 0, used_memory_bytes: 0, pod_count: 0 });
    }
    for pod in &all_pods {
        let Some(host_ip) = &pod.status.host_ip else { continue };
        let Some(on_node) = usage.values_mut().find(|u| u.node.status.addresses.iter().any(|a| a == host_ip)) else { continue };
        let (cpu, mem) = pod.spec.total_requests().unwrap_or((0, 0));
        on_node.used_cpu_millis += cpu;
        on_node.used_memory_bytes += mem;
        on_node.pod_count += 1;
    }

    let pending: Vec<&Pod> = all_pods
        .iter()
        .filter(|p| p.status.phase == PodPhase::Pending && p.status.host_ip.is_none())
        .collect();

    for pod in pending {
        match place_pod(store, &mut usage, pod, policy).await {
            Ok(Some(node_name)) => {
                debug!(pod = %pod.metadata.name, node = %node_name, "scheduled pod");
                record_event(store, pod, EventType::Normal, "Scheduled", &format!("assigned to {node_name}")).await;
            }
            Ok(None) => {
                warn!(pod = %pod.metadata.name, "no node available, FailedScheduling");
                mark_failed_scheduling(store, pod).await;
                record_event(store, pod, EventType::Warning, "FailedScheduling", "no node satisfies filter/score pass").await;
            }
            Err(e) => error!(pod = %pod.metadata.name, error = %e, "scheduling error"),
        }
    }
    Ok(())
}

async fn record_event(store: &FileObjectStore, pod: &Pod, event_type: EventType, reason: &str, message: &str) {
    let involved = InvolvedObjectRef {
        kind: Kind::Pod,
        namespace: pod.metadata.namespace.clone(),
        name: pod.metadata.name.clone(),
        uid: pod.metadata.uid.clone(),
    };
    if let Err(e) = events::record(store, involved, event_type, reason, message).await {
        error!(pod = %pod.metadata.name, error = %e, "failed to record scheduling event");
    }
}

async fn mark_failed_scheduling(store: &FileObjectStore, pod: &Pod) {
    let mut updated = pod.clone();
    updated.status.reason = Some("FailedScheduling".to_string());
    if let Err(e) = store.update(updated).await {
        if !matches!(e, Error::Conflict { .. }) {
            error!(pod = %pod.metadata.name, error = %e, "failed to record FailedScheduling");
        }
    }
}

async fn place_pod(
    store: &FileObjectStore,
    usage: &mut HashMap<String, NodeUsage>,
    pod: &Pod,
    policy: SchedulerPolicy,
) -> Result<Option<String>, Error> {
    let (cpu_req, mem_req) = pod.spec.total_requests()?;

    let mut feasible: Vec<&String> = usage
        .iter()
        .filter(|(_, u)| node_fits(u, pod, cpu_req, mem_req))
        .map(|(name, _)| name)
        .collect();
    feasible.sort();

    if feasible.is_empty() {
        return Ok(None);
    }

    let scored: Vec<(String, f64)> = feasible
        .into_iter()
        .map(|name| (name.clone(), score_node(&usage[name], pod, policy)))
        .collect();

    let best_score = scored.iter().map(|(_, s)| *s).fold(f64::MIN, f64::max);
    let mut tied: Vec<&String> = scored.iter().filter(|(_, s)| *s == best_score).map(|(n, _)| n).collect();
    tied.sort();
    let chosen = tied[0].clone();

    let node_address = usage[&chosen].node.status.addresses.first().cloned().unwrap_or_else(|| chosen.clone());

    let mut updated = pod.clone();
    updated.status.host_ip = Some(node_address);
    store.update(updated).await?;

    if let Some(u) = usage.get_mut(&chosen) {
        u.used_cpu_millis += cpu_req;
        u.used_memory_bytes += mem_req;
        u.pod_count += 1;
    }

    Ok(Some(chosen))
}

fn node_fits(usage: &NodeUsage, pod: &Pod, cpu_req: i64, mem_req: i64) -> bool {
    if !usage.node.status.is_ready() {
        return false;
    }
    if usage.node.spec.unschedulable {
        return false;
    }
    if !selector::matches(&pod.spec.node_selector, &usage.node.metadata.labels) {
        return false;
    }
    for taint in &usage.node.spec.taints {
        if taint.effect != TaintEffect::NoSchedule {
            continue;
        }
        let tolerated = pod.spec.tolerations.iter().any(|t| t.key == taint.key && t.value == taint.value);
        if !tolerated {
            return false;
        }
    }
    let remaining_cpu = usage.node.status.allocatable.cpu_millis - usage.used_cpu_millis;
    let remaining_mem = usage.node.status.allocatable.memory_bytes - usage.used_memory_bytes;
    let remaining_pods = usage.node.status.allocatable.pods - usage.pod_count;
    remaining_cpu >= cpu_req && remaining_mem >= mem_req && remaining_pods >= 1
}

fn score_node(usage: &NodeUsage, pod: &Pod, policy: SchedulerPolicy) -> f64 {
    match policy {
        SchedulerPolicy::Spread | SchedulerPolicy::RoundRobin => -(usage.pod_count as f64),
        SchedulerPolicy::BinPack => usage.pod_count as f64,
        SchedulerPolicy::Random => rand::thread_rng().gen_range(0.0..1.0),
        SchedulerPolicy::Custom => custom_score(usage, pod),
    }
}

fn custom_score(usage: &NodeUsage, pod: &Pod) -> f64 {
    let mut score = 0.0;
    let cpu_cap = usage.node.status.allocatable.cpu_millis.max(1) as f64;
    let mem_cap = usage.node.status.allocatable.memory_bytes.max(1) as f64;
    let (cpu_req, mem_req) = pod.spec.total_requests().unwrap_or((0, 0));
    if cpu_req > 0 {
        score += ((cpu_cap / cpu_req as f64).min(10.0)).max(0.0);
    }
    if mem_req > 0 {
        score += ((mem_cap / mem_req as f64).min(10.0)).max(0.0);
    }
    score -= 0.1 * usage.pod_count as f64;
    score += usage.node.metadata.labels.iter().filter(|(k, v)| pod.metadata.labels.get(*k) == Some(*v)).count() as f64;
    score
}

#[async_trait]
impl Component for Scheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let policy = self.policy;
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SCHEDULER_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = schedule_tick(&store, policy).await {
                            error!(error = %e, "scheduler tick failed");
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
    use chrono::Utc;
    use kos_core::kinds::node::{ConditionStatus, NodeCondition, NodeStatus, ResourceCapacity};
    use kos_core::kinds::pod::PodSpec;
    use kos_core::{Object, ObjectMeta};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    fn ready_node(name: &str, address: &str) -> Node {
        let mut node: Node = Object::new(Kind::Node, ObjectMeta::new(name, None), Default::default());
        node.status = NodeStatus {
            capacity: ResourceCapacity { cpu_millis: 4000, memory_bytes: 8_000_000_000, pods: 110, ephemeral_storage_bytes: 0 },
            allocatable: ResourceCapacity { cpu_millis: 4000, memory_bytes: 8_000_000_000, pods: 110, ephemeral_storage_bytes: 0 },
            addresses: vec![address.to_string()],
            conditions: vec![NodeCondition { condition_type: NodeConditionType::Ready, status: ConditionStatus::True, last_heartbeat_time: Utc::now() }],
            node_info: Default::default(),
        };
        node
    }

    fn pending_pod(name: &str) -> Pod {
        Object::new(Kind::Pod, ObjectMeta::new(name, Some("default".into())), PodSpec::default())
    }

    #[tokio::test]
    async fn schedules_pod_to_feasible_node() {
        let (store, _dir) = store();
        store.create(ready_node("a", "10.0.0.1")).await.unwrap();
        store.create(pending_pod("p")).await.unwrap();

        schedule_tick(&store, SchedulerPolicy::Spread).await.unwrap();

        let pod: Pod = store.get(Kind::Pod, Some("default"), "p").await.unwrap();
        assert_eq!(pod.status.host_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(pod.status.phase, PodPhase::Pending, "scheduler must not advance phase itself");
    }

    #[tokio::test]
    async fn tie_breaks_by_node_name_ascending() {
        let (store, _dir) = store();
        store.create(ready_node("b", "10.0.0.2")).await.unwrap();
        store.create(ready_node("a", "10.0.0.1")).await.unwrap();
        store.create(pending_pod("p")).await.unwrap();

        schedule_tick(&store, SchedulerPolicy::Spread).await.unwrap();

        let pod: Pod = store.get(Kind::Pod, Some("default"), "p").await.unwrap();
        assert_eq!(pod.status.host_ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn no_feasible_node_marks_failed_scheduling() {
        let (store, _dir) = store();
        let mut node = ready_node("a", "10.0.0.1");
        node.spec.unschedulable = true;
        store.create(node).await.unwrap();
        store.create(pending_pod("p")).await.unwrap();

        schedule_tick(&store, SchedulerPolicy::Spread).await.unwrap();

        let pod: Pod = store.get(Kind::Pod, Some("default"), "p").await.unwrap();
        assert!(pod.status.host_ip.is_none());
        assert_eq!(pod.status.reason.as_deref(), Some("FailedScheduling"));
    }
}
