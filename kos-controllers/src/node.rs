//! Node Registry (spec component C). Registers the local node on start and
//! runs a heartbeat task that keeps its conditions current; also detects
//! nodes whose heartbeat has gone stale and marks them `Unknown`.

use async_trait::async_trait;
use chrono::Utc;
use kos_core::kinds::node::{ConditionStatus, Node, NodeConditionType, NodeStatus, ResourceCapacity};
use kos_core::{Error, Kind, ObjectMeta};
use kos_store::FileObjectStore;
use tracing::{debug, error, info, warn};

use crate::cadence::{NODE_HEARTBEAT_INTERVAL, NODE_HEARTBEAT_MISS_FACTOR};
use crate::component::{Component, LoopHandle};

const ALL_CONDITIONS: [NodeConditionType; 5] = [
    NodeConditionType::Ready,
    NodeConditionType::MemoryPressure,
    NodeConditionType::DiskPressure,
    NodeConditionType::PidPressure,
    NodeConditionType::NetworkUnavailable,
];

pub struct NodeRegistry {
    store: FileObjectStore,
    local_node_name: String,
    loop_handle: LoopHandle,
}

impl NodeRegistry {
    pub fn new(store: FileObjectStore, local_node_name: impl Into<String>) -> Self {
        NodeRegistry { store, local_node_name: local_node_name.into(), loop_handle: LoopHandle::new() }
    }

    /// Self-registers the local node with host-derived capacity if it
    /// doesn't already exist; idempotent across restarts.
    pub async fn register_local_node(&self, capacity: ResourceCapacity, addresses: Vec<String>) -> Result<(), Error> {
        if self.store.exists(Kind::Node, None, &self.local_node_name).await {
            return Ok(());
        }
        let mut status = NodeStatus { capacity: capacity.clone(), allocatable: capacity, addresses, ..Default::default() };
        let now = Utc::now();
        for c in ALL_CONDITIONS {
            let initial = if c == NodeConditionType::Ready { ConditionStatus::True } else { ConditionStatus::False };
            status.set_condition(c, initial, now);
        }
        let mut node: Node = kos_core::Object::new(Kind::Node, ObjectMeta::new(&self.local_node_name, None), Default::default());
        node.status = status;
        self.store.create(node).await?;
        info!(node = %self.local_node_name, "registered local node");
        Ok(())
    }
}

/// Probes local host conditions. The actual probing (reading
/// /proc/meminfo, disk usage, etc.) is an external data source per the
/// scope note; this stub reports healthy unconditionally, matching the
/// `metrics` collector's status quo in the teacher's `services::metrics`.
fn probe_local_conditions() -> [(NodeConditionType, ConditionStatus); 5] {
    [
        (NodeConditionType::Ready, ConditionStatus::True),
        (NodeConditionType::MemoryPressure, ConditionStatus::False),
        (NodeConditionType::DiskPressure, ConditionStatus::False),
        (NodeConditionType::PidPressure, ConditionStatus::False),
        (NodeConditionType::NetworkUnavailable, ConditionStatus::False),
    ]
}

async fn heartbeat_tick(store: &FileObjectStore, node_name: &str) -> Result<(), Error> {
    let node: Node = store.get(Kind::Node, None, node_name).await?;
    let mut updated = node.clone();
    let now = Utc::now();
    for (condition_type, status) in probe_local_conditions() {
        updated.status.set_condition(condition_type, status, now);
    }
    store.update(updated).await?;
    debug!(node = node_name, "heartbeat updated");
    Ok(())
}

/// Nodes whose Ready condition hasn't heartbeat-updated within
/// `3 * NODE_HEARTBEAT_INTERVAL` transition to `Unknown`. Runs alongside
/// the local heartbeat so a single-process deployment still detects peers
/// (written by other processes sharing the store) going stale.
async fn detect_stale_nodes(store: &FileObjectStore) -> Result<(), Error> {
    let nodes: Vec<Node> = store.list(Kind::Node, None, None).await?;
    let stale_after = chrono::Duration::from_std(NODE_HEARTBEAT_INTERVAL * NODE_HEARTBEAT_MISS_FACTOR)
        .map_err(|e| Error::Internal(e.to_string()))?;
    let now = Utc::now();
    for node in nodes {
        let Some(ready) = node.status.condition(NodeConditionType::Ready) else { continue };
        if ready.status == ConditionStatus::Unknown {
            continue;
        }
        if now - ready.last_heartbeat_time > stale_after {
            let mut updated = node.clone();
            updated.status.set_condition(NodeConditionType::Ready, ConditionStatus::Unknown, now);
            warn!(node = %node.metadata.name, "heartbeat stale, marking Ready=Unknown");
            if let Err(e) = store.update(updated).await {
                if !matches!(e, Error::Conflict { .. }) {
                    error!(node = %node.metadata.name, error = %e, "failed to mark node stale");
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Component for NodeRegistry {
    fn name(&self) -> &'static str {
        "node-registry"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let node_name = self.local_node_name.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(NODE_HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = heartbeat_tick(&store, &node_name).await {
                            error!(error = %e, "node heartbeat failed");
                        }
                        if let Err(e) = detect_stale_nodes(&store).await {
                            error!(error = %e, "stale node detection failed");
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

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn register_local_node_is_idempotent() {
        let (store, _dir) = store();
        let registry = NodeRegistry::new(store.clone(), "node-1");
        registry.register_local_node(ResourceCapacity { cpu_millis: 4000, memory_bytes: 8_000_000_000, pods: 110, ephemeral_storage_bytes: 0 }, vec!["10.0.0.1".into()]).await.unwrap();
        registry.register_local_node(ResourceCapacity::default(), vec![]).await.unwrap();

        let node: Node = store.get(Kind::Node, None, "node-1").await.unwrap();
        assert_eq!(node.status.capacity.cpu_millis, 4000);
        assert!(node.status.is_ready());
    }

    #[tokio::test]
    async fn heartbeat_tick_updates_timestamp() {
        let (store, _dir) = store();
        let registry = NodeRegistry::new(store.clone(), "node-1");
        registry.register_local_node(ResourceCapacity::default(), vec![]).await.unwrap();
        let before: Node = store.get(Kind::Node, None, "node-1").await.unwrap();
        let before_ts = before.status.condition(NodeConditionType::Ready).unwrap().last_heartbeat_time;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        heartbeat_tick(&store, "node-1").await.unwrap();

        let after: Node = store.get(Kind::Node, None, "node-1").await.unwrap();
        let after_ts = after.status.condition(NodeConditionType::Ready).unwrap().last_heartbeat_time;
        assert!(after_ts >= before_ts);
    }

    #[tokio::test]
    async fn stale_node_becomes_unknown() {
        let (store, _dir) = store();
        let registry = NodeRegistry::new(store.clone(), "node-1");
        registry.register_local_node(ResourceCapacity::default(), vec![]).await.unwrap();

        let mut node: Node = store.get(Kind::Node, None, "node-1").await.unwrap();
        let stale_time = Utc::now() - chrono::Duration::hours(1);
        node.status.set_condition(NodeConditionType::Ready, ConditionStatus::True, stale_time);
        store.update(node).await.unwrap();

        detect_stale_nodes(&store).await.unwrap();

        let updated: Node = store.get(Kind::Node, None, "node-1").await.unwrap();
        assert_eq!(updated.status.condition(NodeConditionType::Ready).unwrap().status, ConditionStatus::Unknown);
    }
}
