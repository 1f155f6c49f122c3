//! Composition root: wires the store, dispatcher, engine, monitor and API
//! together from a loaded configuration.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::ClmConfig;
use crate::database::DatabaseManager;
use crate::monitor::{MonitorContext, MonitorScheduler};
use crate::notifications::{EmailSender, NotificationDispatcher};
use crate::observability::WorkflowMetrics;
use crate::shutdown::ShutdownCoordinator;
use crate::store::SqliteStore;
use crate::workflow::WorkflowEngine;

/// Every long-lived service of a running process.
pub struct Services {
    pub config: ClmConfig,
    pub database: DatabaseManager,
    pub metrics: Arc<WorkflowMetrics>,
    pub store: Arc<SqliteStore>,
    pub dispatcher: Arc<NotificationDispatcher<SqliteStore>>,
    pub engine: Arc<WorkflowEngine<SqliteStore>>,
}

impl Services {
    pub async fn build(config: ClmConfig, email: Arc<dyn EmailSender>) -> Result<Self> {
        let database = DatabaseManager::connect(&config.database).await?;
        let metrics = Arc::new(WorkflowMetrics::new());
        let store = Arc::new(SqliteStore::new(database.pool().clone()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            email,
            config.notifications.clone(),
            metrics.clone(),
        ));
        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            dispatcher.clone(),
            metrics.clone(),
        ));
        Ok(Self {
            config,
            database,
            metrics,
            store,
            dispatcher,
            engine,
        })
    }

    pub fn monitor(&self) -> MonitorScheduler<SqliteStore> {
        let context = Arc::new(MonitorContext::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.config.monitor.clone(),
        ));
        MonitorScheduler::new(context, self.metrics.clone())
    }

    pub fn app_state(&self) -> Arc<AppState<SqliteStore>> {
        Arc::new(AppState::new(
            self.engine.clone(),
            Duration::from_secs(self.config.server.user_cache_ttl_seconds),
        ))
    }

    /// Run the API and, when enabled, the monitor until `shutdown` fires.
    pub async fn serve(self, shutdown: &ShutdownCoordinator) -> Result<()> {
        let listener = TcpListener::bind(self.config.server.bind)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.server.bind))?;

        let monitor = if self.config.monitor.enabled {
            Some(self.monitor().start())
        } else {
            info!("Monitor disabled by configuration");
            None
        };

        let served = api::serve_on(listener, self.app_state(), shutdown.wait()).await;
        ShutdownCoordinator::shutdown_all_services(monitor, self.metrics.clone(), &self.database)
            .await;
        served
    }
}
