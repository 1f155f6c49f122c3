use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::database::DatabaseManager;
use crate::monitor::MonitorHandle;
use crate::observability::WorkflowMetrics;
use crate::telemetry::shutdown_telemetry;

/// Graceful shutdown coordinator for the service.
///
/// One signal listener feeds any number of shutdown futures: the HTTP server
/// drains on one of them while `shutdown_all_services` tears the rest down.
pub struct ShutdownCoordinator {
    trigger: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (trigger, _) = watch::channel(false);
        Self {
            trigger: Arc::new(trigger),
        }
    }

    /// Listen for SIGINT/SIGTERM in the background.
    pub fn install_signal_handlers(&self) {
        let trigger = self.trigger.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown signal received");
            trigger.send_replace(true);
        });
    }

    /// Trigger shutdown without a signal.
    pub fn trigger(&self) {
        self.trigger.send_replace(true);
    }

    /// Resolves once shutdown has been triggered.
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut receiver = self.trigger.subscribe();
        async move {
            // A dropped coordinator counts as shutdown.
            let _ = receiver.wait_for(|stopping| *stopping).await;
        }
    }

    /// Stop background work and release resources.
    pub async fn shutdown_all_services(
        monitor: Option<MonitorHandle>,
        metrics: Arc<WorkflowMetrics>,
        database: &DatabaseManager,
    ) {
        info!("Initiating graceful shutdown of all services...");

        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        metrics.log_stats();
        database.close().await;
        shutdown_telemetry();

        info!("Graceful shutdown completed successfully");
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn every_waiter_resolves_after_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let first = tokio::spawn(coordinator.wait());
        let second = tokio::spawn(coordinator.wait());

        coordinator.trigger();
        tokio::time::timeout(Duration::from_secs(1), async {
            first.await.unwrap();
            second.await.unwrap();
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn waiter_created_after_trigger_resolves_immediately() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger();
        tokio::time::timeout(Duration::from_secs(1), coordinator.wait())
            .await
            .unwrap();
    }
}
