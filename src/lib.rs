//! Contract lifecycle workflow service.
//!
//! Contracts move through a company's master approval workflow one step at a
//! time. The [`workflow::WorkflowEngine`] applies approver decisions
//! atomically, [`notifications`] tells the next people in line, and the
//! [`monitor`] chases stalled approvals and due obligations.

pub mod api;
pub mod app;
pub mod config;
pub mod database;
pub mod monitor;
pub mod notifications;
pub mod observability;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod workflow;

pub use app::Services;
pub use config::ClmConfig;
pub use database::DatabaseManager;
pub use monitor::{MonitorHandle, MonitorJob, MonitorScheduler};
pub use observability::{OperationTimer, WorkflowMetrics};
pub use shutdown::ShutdownCoordinator;
pub use store::{MemoryStore, SqliteStore, StoreError, WorkflowStore};
pub use telemetry::{init_telemetry, shutdown_telemetry};
pub use workflow::{Decision, WorkflowEngine, WorkflowError};
