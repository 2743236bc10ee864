//! Controller loops that drive observed cluster state toward declared
//! state: one reconcile task per kind family, each on its own cadence,
//! coordinated only through the object store (never calling each other
//! directly) and supervised for lifecycle/healthcheck by `supervisor`.

pub mod cadence;
pub mod component;
pub mod cron;
pub mod cronjob;
pub mod deployment;
pub mod dns;
pub mod events;
pub mod hpa;
pub mod ipam;
pub mod job;
pub mod namespace;
pub mod node;
pub mod pod_admission;
pub mod quota;
pub mod replicaset;
pub mod scheduler;
pub mod service;
pub mod statefulset;
pub mod supervisor;
pub mod template_hash;
pub mod volume;

pub use component::{Component, LoopHandle};
pub use supervisor::Supervisor;
