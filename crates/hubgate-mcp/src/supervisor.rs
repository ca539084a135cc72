//! Periodic sweep driver.
//!
//! Runs `ConnectionManager::sweep` on a fixed interval until stopped. Sweep
//! outcomes are logged; nothing propagates to request callers.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::manager::ConnectionManager;

#[derive(Debug)]
pub struct SweepSupervisor {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweepSupervisor {
    /// Spawn the sweep loop. The first sweep runs one interval after start.
    pub fn start(manager: Arc<ConnectionManager>) -> Self {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let period = manager.config().sweep_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval() fires immediately; skip that tick
            ticker.tick().await;

            debug!(interval_secs = period.as_secs(), "sweep supervisor started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = manager.sweep().await;
                        debug!(
                            probed = report.probed,
                            evicted = report.evicted.len(),
                            "sweep tick"
                        );
                    }
                }
            }
            debug!("sweep supervisor stopped");
        });

        Self { cancel_token, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and wait for an in-progress sweep to finish.
    pub async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "sweep supervisor task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::EchoServer;
    use crate::testing::EchoTransportFactory;
    use crate::transport::TransportFactory;
    use hubgate_core::{
        GatewayConfig, InMemoryRegistry, NewServerRegistration, TransportConfig,
    };
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn evicts_idle_sessions_on_schedule() {
        let registry = Arc::new(InMemoryRegistry::with_registrations(vec![
            NewServerRegistration::new(TransportConfig::stdio("echo", vec![]))
                .into_registration("a"),
        ]));
        let factory: Arc<dyn TransportFactory> =
            Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let config = GatewayConfig::default()
            .with_idle_timeout(Duration::from_secs(60))
            .with_sweep_interval(Duration::from_secs(30));
        let manager = Arc::new(ConnectionManager::new(registry, factory, config));
        manager.acquire("a").await.unwrap();

        let supervisor = SweepSupervisor::start(Arc::clone(&manager));
        assert!(supervisor.is_running());

        // Sweeps at 30s and 60s; the 60s sweep finds the session idle.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(manager.session("a").await.is_none());

        supervisor.stop().await;
    }
}
