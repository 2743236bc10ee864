//! The Lifecycle Supervisor's view of a controller: start it, stop it,
//! probe whether it's healthy. Each controller in this crate implements
//! this once and runs its reconcile loop as a spawned task owned by the
//! `start` call, per the "Supervisor owns all lifetimes" design note.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use kos_core::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cadence::STOP_GRACE_PERIOD;

#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &'static str;

    /// Spawns the component's reconcile loop. Must return once the task is
    /// running, not once it finishes (it runs until `stop`).
    async fn start(&self) -> Result<(), Error>;

    /// Signals the component's loop to exit and waits for it, up to the
    /// supervisor's grace period.
    async fn stop(&self) -> Result<(), Error>;

    async fn healthy(&self) -> bool;
}

/// Shared bookkeeping for a spawned reconcile loop: a cancellation token
/// checked at the top of each reconcile and at each suspension point, the
/// task handle so `stop` can await it, and a liveness flag set on `spawn`
/// and cleared on `stop`. A loop whose task panics mid-run is not detected
/// as unhealthy by this flag alone; the supervisor's healthcheck tick only
/// restarts what's explicitly marked dead.
pub struct LoopHandle {
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    alive: AtomicBool,
}

impl Default for LoopHandle {
    fn default() -> Self {
        LoopHandle { token: CancellationToken::new(), task: Mutex::new(None), alive: AtomicBool::new(false) }
    }
}

impl LoopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub async fn spawn(&self, name: &'static str, task: JoinHandle<()>) {
        *self.task.lock().await = Some(task);
        self.mark_alive();
        debug!(component = name, "spawned reconcile loop");
    }

    /// Cancels the loop and waits up to the grace period for it to exit;
    /// a loop that overruns is dropped (the supervisor hard-drops it).
    pub async fn stop(&self, name: &'static str) {
        self.token.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_GRACE_PERIOD, handle).await.is_err() {
                warn!(component = name, "did not stop within grace period, dropping");
            }
        }
        self.mark_dead();
    }
}
