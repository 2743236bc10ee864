//! Default reconcile cadences per the concurrency & resource model: 10–30s
//! for most controllers, 60s for node heartbeat, 15s for HPA.

use std::time::Duration;

pub const NAMESPACE_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
pub const SCHEDULER_INTERVAL: Duration = Duration::from_secs(10);
pub const NODE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const NODE_HEARTBEAT_MISS_FACTOR: u32 = 3;
pub const SERVICE_ENDPOINTS_INTERVAL: Duration = Duration::from_secs(10);
pub const DNS_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const DNS_DEFAULT_TTL_SECONDS: u32 = 60;
pub const QUOTA_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
pub const PV_BINDER_INTERVAL: Duration = Duration::from_secs(15);
pub const REPLICASET_INTERVAL: Duration = Duration::from_secs(10);
pub const DEPLOYMENT_INTERVAL: Duration = Duration::from_secs(10);
pub const STATEFULSET_INTERVAL: Duration = Duration::from_secs(10);
pub const JOB_INTERVAL: Duration = Duration::from_secs(10);
pub const CRONJOB_INTERVAL: Duration = Duration::from_secs(10);
pub const HPA_INTERVAL: Duration = Duration::from_secs(15);
pub const EVENT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);
pub const EVENT_COALESCE_WINDOW: chrono::Duration = chrono::Duration::minutes(5);
pub const EVENT_NORMAL_TTL: chrono::Duration = chrono::Duration::hours(1);
pub const EVENT_WARNING_TTL: chrono::Duration = chrono::Duration::hours(24);
pub const SUPERVISOR_HEALTHCHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);
