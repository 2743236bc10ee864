//! Lifecycle Supervisor (spec component P). Starts every controller in
//! dependency order, restarts any that report unhealthy, and tears
//! everything down in reverse order on shutdown.

use std::sync::Arc;

use kos_core::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cadence::SUPERVISOR_HEALTHCHECK_INTERVAL;
use crate::component::Component;

/// One dependency tier: every component in a tier is started before the
/// next tier begins, matching "controllers I-N started after E/F/G/H are
/// healthy".
pub struct Supervisor {
    tiers: Vec<Vec<Arc<dyn Component>>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor { tiers: Vec::new() }
    }

    pub fn add_tier(&mut self, components: Vec<Arc<dyn Component>>) -> &mut Self {
        self.tiers.push(components);
        self
    }

    fn all_components(&self) -> Vec<Arc<dyn Component>> {
        self.tiers.iter().flatten().cloned().collect()
    }

    pub async fn start_all(&self) -> Result<(), Error> {
        for tier in &self.tiers {
            for component in tier {
                info!(component = component.name(), "starting component");
                component.start().await?;
            }
            for component in tier {
                if !component.healthy().await {
                    return Err(Error::Internal(format!("{} failed to become healthy", component.name())));
                }
            }
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        for tier in self.tiers.iter().rev() {
            for component in tier.iter().rev() {
                info!(component = component.name(), "stopping component");
                if let Err(e) = component.stop().await {
                    error!(component = component.name(), error = %e, "error stopping component");
                }
            }
        }
    }

    /// Ticks `healthcheck_tick` until `cancel` fires. Split out of
    /// `run_until_signal` so a caller that needs to run its own HTTP server
    /// alongside the healthcheck loop (rather than blocking on
    /// `shutdown_signal` itself) can still get restart-on-unhealthy for
    /// free, cancelling this independently of the server's own shutdown.
    pub async fn run_healthchecks(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(SUPERVISOR_HEALTHCHECK_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.healthcheck_tick().await;
                }
            }
        }
    }

    async fn healthcheck_tick(&self) {
        for component in self.all_components() {
            if !component.healthy().await {
                warn!(component = component.name(), "unhealthy, restarting in place");
                if let Err(e) = component.stop().await {
                    error!(component = component.name(), error = %e, "error stopping unhealthy component");
                }
                if let Err(e) = component.start().await {
                    error!(component = component.name(), error = %e, "failed to restart component");
                }
            }
        }
    }

    /// Runs until SIGTERM/SIGINT, then stops every component in reverse
    /// order. Call `start_all` first.
    pub async fn run_until_signal(&self) {
        let cancel = CancellationToken::new();
        tokio::select! {
            _ = shutdown_signal() => info!("shutdown signal received"),
            _ = self.run_healthchecks(cancel.clone()) => {}
        }
        cancel.cancel();
        self.stop_all().await;
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingComponent {
        name: &'static str,
        starts: AtomicU32,
        stops: AtomicU32,
    }

    #[async_trait]
    impl Component for CountingComponent {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn start(&self) -> Result<(), Error> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> Result<(), Error> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn healthy(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn starts_tiers_in_order_and_stops_in_reverse() {
        let a = Arc::new(CountingComponent { name: "a", starts: AtomicU32::new(0), stops: AtomicU32::new(0) });
        let b = Arc::new(CountingComponent { name: "b", starts: AtomicU32::new(0), stops: AtomicU32::new(0) });

        let mut supervisor = Supervisor::new();
        supervisor.add_tier(vec![a.clone() as Arc<dyn Component>]);
        supervisor.add_tier(vec![b.clone() as Arc<dyn Component>]);

        supervisor.start_all().await.unwrap();
        assert_eq!(a.starts.load(Ordering::SeqCst), 1);
        assert_eq!(b.starts.load(Ordering::SeqCst), 1);

        supervisor.stop_all().await;
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
        assert_eq!(b.stops.load(Ordering::SeqCst), 1);
    }
}
