//! Environment-driven configuration, read once at startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use kos_controllers::scheduler::SchedulerPolicy;
use kos_core::kinds::node::ResourceCapacity;

pub struct Config {
    pub root: PathBuf,
    pub local_node_name: String,
    pub local_node_addresses: Vec<String>,
    pub local_node_capacity: ResourceCapacity,
    pub default_namespace: String,
    pub cluster_cidr: String,
    pub external_cidr: Option<String>,
    pub cluster_domain: String,
    pub scheduler_policy: SchedulerPolicy,
    pub http_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Self {
        let root = std::env::var("KOS_ROOT").unwrap_or_else(|_| "/tmp/kos".to_string());
        let local_node_name = std::env::var("KOS_NODE_NAME").unwrap_or_else(|_| "node-local".to_string());
        let local_node_addresses = std::env::var("KOS_NODE_ADDRESSES")
            .ok()
            .map(|s| s.split(',').map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect())
            .unwrap_or_else(|| vec!["127.0.0.1".to_string()]);
        let local_node_capacity = ResourceCapacity {
            cpu_millis: env_i64("KOS_NODE_CPU_MILLIS", 4_000),
            memory_bytes: env_i64("KOS_NODE_MEMORY_BYTES", 8_000_000_000),
            pods: env_i64("KOS_NODE_PODS", 110),
            ephemeral_storage_bytes: env_i64("KOS_NODE_EPHEMERAL_STORAGE_BYTES", 0),
        };
        let default_namespace = std::env::var("KOS_DEFAULT_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        let cluster_cidr = std::env::var("KOS_CLUSTER_CIDR").unwrap_or_else(|_| "10.96.0.0/16".to_string());
        let external_cidr = std::env::var("KOS_EXTERNAL_CIDR").ok();
        let cluster_domain = std::env::var("KOS_CLUSTER_DOMAIN").unwrap_or_else(|_| "cluster.local".to_string());
        let scheduler_policy = match std::env::var("KOS_SCHEDULER_POLICY").as_deref() {
            Ok("BinPack") => SchedulerPolicy::BinPack,
            Ok("RoundRobin") => SchedulerPolicy::RoundRobin,
            Ok("Random") => SchedulerPolicy::Random,
            Ok("Custom") => SchedulerPolicy::Custom,
            _ => SchedulerPolicy::Spread,
        };
        let http_addr: SocketAddr = std::env::var("KOS_HTTP_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| ([0, 0, 0, 0], 8080).into());

        Config {
            root: PathBuf::from(root),
            local_node_name,
            local_node_addresses,
            local_node_capacity,
            default_namespace,
            cluster_cidr,
            external_cidr,
            cluster_domain,
            scheduler_policy,
            http_addr,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}
