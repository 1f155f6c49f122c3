//! Data store seam for the workflow engine.
//!
//! The engine only ever talks to the relational store through
//! [`WorkflowStore`]. Two backends ship with the crate: [`SqliteStore`] for
//! real deployments and [`MemoryStore`] for tests and local experiments.

mod memory;
mod sqlite;

pub use memory::{FailPoint, MemoryStore};
pub use sqlite::{encode_timestamp, SqliteStore};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::workflow::status::{DeliveryStatus, InstanceStatus, NotificationKind, ParseStatusError};
use crate::workflow::types::{
    CompanyId, Contract, ContractId, ContractStatusUpdate, HistoryEntry, InstanceId,
    NewAuditRecord, NewNotification, Notification, ObligationDue, StalledApproval, User, UserId,
    WorkflowId, WorkflowInstance,
};

/// Errors a store backend can return
#[derive(Debug, Error)]
pub enum StoreError {
    /// The compare-and-swap on `current_step` matched no row.
    #[error("concurrent update on workflow instance {instance_id}: expected step {expected_step}")]
    ConcurrentConflict {
        instance_id: InstanceId,
        expected_step: i64,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A stored label or payload failed validation on read.
    #[error("corrupt row data: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage backend error: {0}")]
    Backend(String),

    /// Failure injected by [`MemoryStore`] at a [`FailPoint`].
    #[error("injected failure at {0}")]
    Injected(&'static str),
}

impl From<ParseStatusError> for StoreError {
    fn from(err: ParseStatusError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(format!("invalid JSON payload: {err}"))
    }
}

/// Transactional access to contracts, workflows and their side tables.
///
/// ## Snapshots
///
/// Mutations happen inside a `Snapshot`, the backend's transaction type:
///
/// 1. `begin_snapshot()` opens it
/// 2. snapshot-scoped methods read and write through `&mut Self::Snapshot`
/// 3. `commit_snapshot()` makes everything durable, `abort_snapshot()` discards it
///
/// Dropping a snapshot without committing must discard its writes.
///
/// Callers must not use the non-snapshot methods while they hold a snapshot:
/// backends are allowed to serialise snapshots against the whole store.
///
/// ## Locking
///
/// `lock_active_instance` must leave the returned instance locked against other
/// snapshots until this one ends, and `update_instance` must re-check
/// `current_step`, failing with [`StoreError::ConcurrentConflict`] when it moved.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    type Snapshot: Send;

    // ── Snapshot lifecycle ─────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StoreError>;

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StoreError>;

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StoreError>;

    // ── Reads and writes inside a snapshot ─────────────────────────────────

    /// Select and lock the instance a decision on `contract_id` acts on.
    ///
    /// Only instances of active workflows owned by `company_id` with status
    /// pending/active qualify; the master workflow wins, then the highest
    /// workflow id.
    async fn lock_active_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        contract_id: ContractId,
        company_id: CompanyId,
    ) -> Result<Option<WorkflowInstance>, StoreError>;

    /// Number of distinct non-e-sign step numbers in a workflow.
    async fn count_approval_steps(
        &self,
        snapshot: &mut Self::Snapshot,
        workflow_id: WorkflowId,
    ) -> Result<i64, StoreError>;

    /// Users assigned to approval steps numbered `step_number` who belong to `company_id`.
    async fn step_assignees(
        &self,
        snapshot: &mut Self::Snapshot,
        workflow_id: WorkflowId,
        step_number: i64,
        company_id: CompanyId,
    ) -> Result<Vec<User>, StoreError>;

    async fn contract_in_snapshot(
        &self,
        snapshot: &mut Self::Snapshot,
        contract_id: ContractId,
    ) -> Result<Option<Contract>, StoreError>;

    async fn update_contract_status(
        &self,
        snapshot: &mut Self::Snapshot,
        contract_id: ContractId,
        update: &ContractStatusUpdate,
    ) -> Result<(), StoreError>;

    /// Compare-and-swap the instance's step and status.
    async fn update_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        instance_id: InstanceId,
        expected_step: i64,
        new_step: i64,
        new_status: InstanceStatus,
    ) -> Result<(), StoreError>;

    async fn insert_audit_record(
        &self,
        snapshot: &mut Self::Snapshot,
        record: NewAuditRecord,
    ) -> Result<i64, StoreError>;

    /// Actionable instances of active workflows untouched since `idle_since`.
    async fn stalled_approvals(
        &self,
        snapshot: &mut Self::Snapshot,
        idle_since: DateTime<Utc>,
    ) -> Result<Vec<StalledApproval>, StoreError>;

    /// Open obligations due on or before `due_by` not reminded since `reminded_before`.
    async fn obligations_due(
        &self,
        snapshot: &mut Self::Snapshot,
        due_by: NaiveDate,
        reminded_before: DateTime<Utc>,
    ) -> Result<Vec<ObligationDue>, StoreError>;

    async fn mark_obligation_reminded(
        &self,
        snapshot: &mut Self::Snapshot,
        obligation_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ── Queries and single-statement writes outside a snapshot ─────────────

    async fn get_contract(&self, contract_id: ContractId) -> Result<Option<Contract>, StoreError>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    /// Approve/reject audit records of a contract with their actors, newest first.
    async fn list_history(&self, contract_id: ContractId) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Distinct assignees of the company's active master workflow.
    async fn master_workflow_participants(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<User>, StoreError>;

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError>;

    /// Record a delivery attempt. `Sent` and `Failed` count as an attempt.
    async fn record_delivery(
        &self,
        notification_id: i64,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Failed notifications, plus pending ones created before `pending_before`,
    /// with fewer than `max_attempts` attempts, oldest first.
    async fn undelivered_notifications(
        &self,
        max_attempts: i64,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Whether `recipient_id` got a `kind` notification about `contract_id` since `since`.
    async fn notification_sent_since(
        &self,
        recipient_id: UserId,
        contract_id: Option<ContractId>,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
