// In-process store: one mutex-guarded state, snapshots are staged copies

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{StoreError, WorkflowStore};
use crate::workflow::status::{DeliveryStatus, InstanceStatus, NotificationKind, ObligationStatus};
use crate::workflow::types::{
    AuditRecord, CompanyId, Contract, ContractId, ContractStatusUpdate, HistoryEntry, InstanceId,
    NewAuditRecord, NewNotification, Notification, Obligation, ObligationDue, StalledApproval,
    User, UserId, Workflow, WorkflowId, WorkflowInstance, WorkflowStep,
};

/// Points where [`MemoryStore`] can be told to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    LockInstance,
    ContractUpdate,
    InstanceUpdate,
    AuditInsert,
    Commit,
    NotificationInsert,
}

impl FailPoint {
    fn name(&self) -> &'static str {
        match self {
            FailPoint::LockInstance => "lock_instance",
            FailPoint::ContractUpdate => "contract_update",
            FailPoint::InstanceUpdate => "instance_update",
            FailPoint::AuditInsert => "audit_insert",
            FailPoint::Commit => "commit",
            FailPoint::NotificationInsert => "notification_insert",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<UserId, User>,
    contracts: BTreeMap<ContractId, Contract>,
    workflows: BTreeMap<WorkflowId, Workflow>,
    steps: Vec<WorkflowStep>,
    instances: BTreeMap<InstanceId, WorkflowInstance>,
    audit: Vec<AuditRecord>,
    notifications: Vec<Notification>,
    obligations: BTreeMap<i64, Obligation>,
    next_id: i64,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn workflow(&self, workflow_id: WorkflowId) -> Option<&Workflow> {
        self.workflows.get(&workflow_id)
    }
}

pub struct MemorySnapshot {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

/// Store held entirely in memory.
///
/// A snapshot holds the store lock from `begin_snapshot` until it ends, so
/// snapshots are fully serialised. Writes go to a staged copy that replaces the
/// live state only on commit.
#[derive(Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_points: StdMutex<HashSet<FailPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot failure at `point`.
    pub fn fail_once(&self, point: FailPoint) {
        if let Ok(mut points) = self.fail_points.lock() {
            points.insert(point);
        }
    }

    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        let triggered = self
            .fail_points
            .lock()
            .map(|mut points| points.remove(&point))
            .unwrap_or(false);
        if triggered {
            Err(StoreError::Injected(point.name()))
        } else {
            Ok(())
        }
    }

    // ── Seeding ────────────────────────────────────────────────────────────

    pub async fn add_user(&self, user: User) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(user.id);
        state.users.insert(user.id, user);
    }

    pub async fn add_contract(&self, contract: Contract) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(contract.id);
        state.contracts.insert(contract.id, contract);
    }

    pub async fn add_workflow(&self, workflow: Workflow) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(workflow.id);
        state.workflows.insert(workflow.id, workflow);
    }

    pub async fn add_step(&self, step: WorkflowStep) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(step.id);
        state.steps.push(step);
    }

    pub async fn add_instance(&self, instance: WorkflowInstance) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(instance.id);
        state.instances.insert(instance.id, instance);
    }

    pub async fn add_obligation(&self, obligation: Obligation) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(obligation.id);
        state.obligations.insert(obligation.id, obligation);
    }

    // ── Inspection ─────────────────────────────────────────────────────────

    pub async fn contract(&self, contract_id: ContractId) -> Option<Contract> {
        self.state.lock().await.contracts.get(&contract_id).cloned()
    }

    pub async fn instance(&self, instance_id: InstanceId) -> Option<WorkflowInstance> {
        self.state.lock().await.instances.get(&instance_id).cloned()
    }

    pub async fn obligation(&self, obligation_id: i64) -> Option<Obligation> {
        self.state.lock().await.obligations.get(&obligation_id).cloned()
    }

    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.state.lock().await.audit.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }
}

fn is_approval_step_for(step: &WorkflowStep, workflow_id: WorkflowId, step_number: i64) -> bool {
    step.workflow_id == workflow_id && step.step_number == step_number && step.is_approval_step()
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(MemorySnapshot { guard, staged })
    }

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StoreError> {
        self.check(FailPoint::Commit)?;
        let MemorySnapshot { mut guard, staged } = snapshot;
        *guard = staged;
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StoreError> {
        drop(snapshot);
        Ok(())
    }

    async fn lock_active_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        contract_id: ContractId,
        company_id: CompanyId,
    ) -> Result<Option<WorkflowInstance>, StoreError> {
        self.check(FailPoint::LockInstance)?;
        let state = &snapshot.staged;
        let selected = state
            .instances
            .values()
            .filter(|instance| {
                instance.contract_id == contract_id && instance.status.is_actionable()
            })
            .filter_map(|instance| {
                let workflow = state.workflow(instance.workflow_id)?;
                (workflow.company_id == company_id && workflow.is_active)
                    .then_some((instance, workflow))
            })
            .max_by_key(|(_, workflow)| (workflow.is_master, workflow.id))
            .map(|(instance, workflow)| WorkflowInstance {
                is_master: workflow.is_master,
                ..instance.clone()
            });
        Ok(selected)
    }

    async fn count_approval_steps(
        &self,
        snapshot: &mut Self::Snapshot,
        workflow_id: WorkflowId,
    ) -> Result<i64, StoreError> {
        let numbers: HashSet<i64> = snapshot
            .staged
            .steps
            .iter()
            .filter(|step| step.workflow_id == workflow_id && step.is_approval_step())
            .map(|step| step.step_number)
            .collect();
        Ok(numbers.len() as i64)
    }

    async fn step_assignees(
        &self,
        snapshot: &mut Self::Snapshot,
        workflow_id: WorkflowId,
        step_number: i64,
        company_id: CompanyId,
    ) -> Result<Vec<User>, StoreError> {
        let state = &snapshot.staged;
        let ids: HashSet<UserId> = state
            .steps
            .iter()
            .filter(|step| is_approval_step_for(step, workflow_id, step_number))
            .filter_map(|step| step.assignee_user_id)
            .collect();
        Ok(state
            .users
            .values()
            .filter(|user| ids.contains(&user.id) && user.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn contract_in_snapshot(
        &self,
        snapshot: &mut Self::Snapshot,
        contract_id: ContractId,
    ) -> Result<Option<Contract>, StoreError> {
        Ok(snapshot.staged.contracts.get(&contract_id).cloned())
    }

    async fn update_contract_status(
        &self,
        snapshot: &mut Self::Snapshot,
        contract_id: ContractId,
        update: &ContractStatusUpdate,
    ) -> Result<(), StoreError> {
        self.check(FailPoint::ContractUpdate)?;
        let contract = snapshot
            .staged
            .contracts
            .get_mut(&contract_id)
            .ok_or(StoreError::NotFound {
                entity: "contract",
                id: contract_id,
            })?;
        if let Some(status) = update.status {
            contract.status = status.into();
        }
        if let Some(approval_status) = update.approval_status {
            contract.approval_status = Some(approval_status.into());
        }
        if let Some(workflow_status) = update.workflow_status {
            contract.workflow_status = Some(workflow_status.into());
        }
        contract.updated_at = Utc::now();
        Ok(())
    }

    async fn update_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        instance_id: InstanceId,
        expected_step: i64,
        new_step: i64,
        new_status: InstanceStatus,
    ) -> Result<(), StoreError> {
        self.check(FailPoint::InstanceUpdate)?;
        match snapshot.staged.instances.get_mut(&instance_id) {
            Some(instance)
                if instance.current_step == expected_step && instance.status.is_actionable() =>
            {
                instance.current_step = new_step;
                instance.status = new_status;
                instance.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::ConcurrentConflict {
                instance_id,
                expected_step,
            }),
        }
    }

    async fn insert_audit_record(
        &self,
        snapshot: &mut Self::Snapshot,
        record: NewAuditRecord,
    ) -> Result<i64, StoreError> {
        self.check(FailPoint::AuditInsert)?;
        let state = &mut snapshot.staged;
        let id = state.allocate_id();
        state.audit.push(AuditRecord {
            id,
            user_id: record.user_id,
            contract_id: record.contract_id,
            action_type: record.action_type,
            details: record.details,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn stalled_approvals(
        &self,
        snapshot: &mut Self::Snapshot,
        idle_since: DateTime<Utc>,
    ) -> Result<Vec<StalledApproval>, StoreError> {
        let state = &snapshot.staged;
        Ok(state
            .instances
            .values()
            .filter(|instance| instance.status.is_actionable() && instance.updated_at < idle_since)
            .filter_map(|instance| {
                let workflow = state.workflow(instance.workflow_id)?;
                let contract = state.contracts.get(&instance.contract_id)?;
                (workflow.is_active && workflow.company_id == contract.company_id).then(|| {
                    StalledApproval {
                        instance: WorkflowInstance {
                            is_master: workflow.is_master,
                            ..instance.clone()
                        },
                        contract: contract.clone(),
                    }
                })
            })
            .collect())
    }

    async fn obligations_due(
        &self,
        snapshot: &mut Self::Snapshot,
        due_by: NaiveDate,
        reminded_before: DateTime<Utc>,
    ) -> Result<Vec<ObligationDue>, StoreError> {
        let state = &snapshot.staged;
        let mut due: Vec<ObligationDue> = state
            .obligations
            .values()
            .filter(|o| o.status == ObligationStatus::Open && o.due_date <= due_by)
            .filter(|o| o.last_reminded_at.map_or(true, |at| at < reminded_before))
            .filter_map(|o| {
                let contract = state.contracts.get(&o.contract_id)?;
                Some(ObligationDue {
                    obligation: o.clone(),
                    contract: contract.summary(),
                    contract_creator: contract.created_by,
                })
            })
            .collect();
        due.sort_by_key(|d| (d.obligation.due_date, d.obligation.id));
        Ok(due)
    }

    async fn mark_obligation_reminded(
        &self,
        snapshot: &mut Self::Snapshot,
        obligation_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let obligation = snapshot
            .staged
            .obligations
            .get_mut(&obligation_id)
            .ok_or(StoreError::NotFound {
                entity: "obligation",
                id: obligation_id,
            })?;
        obligation.last_reminded_at = Some(at);
        Ok(())
    }

    async fn get_contract(&self, contract_id: ContractId) -> Result<Option<Contract>, StoreError> {
        Ok(self.contract(contract_id).await)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn list_history(&self, contract_id: ContractId) -> Result<Vec<HistoryEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<&AuditRecord> = state
            .audit
            .iter()
            .filter(|r| {
                r.contract_id == contract_id
                    && crate::workflow::status::AuditAction::HISTORY.contains(&r.action_type)
            })
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records
            .into_iter()
            .map(|record| HistoryEntry {
                record: record.clone(),
                actor: state.users.get(&record.user_id).cloned(),
            })
            .collect())
    }

    async fn master_workflow_participants(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<User>, StoreError> {
        let state = self.state.lock().await;
        let masters: HashSet<WorkflowId> = state
            .workflows
            .values()
            .filter(|w| w.company_id == company_id && w.is_master && w.is_active)
            .map(|w| w.id)
            .collect();
        let ids: HashSet<UserId> = state
            .steps
            .iter()
            .filter(|step| masters.contains(&step.workflow_id))
            .filter_map(|step| step.assignee_user_id)
            .collect();
        Ok(state
            .users
            .values()
            .filter(|user| ids.contains(&user.id) && user.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        self.check(FailPoint::NotificationInsert)?;
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let row = Notification {
            id,
            recipient_id: notification.recipient_id,
            contract_id: notification.contract_id,
            title: notification.title,
            message: notification.message,
            kind: notification.kind,
            read: false,
            delivery_status: DeliveryStatus::Pending,
            delivery_attempts: 0,
            last_error: None,
            created_at: Utc::now(),
        };
        state.notifications.push(row.clone());
        Ok(row)
    }

    async fn record_delivery(
        &self,
        notification_id: i64,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let row = state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id)
            .ok_or(StoreError::NotFound {
                entity: "notification",
                id: notification_id,
            })?;
        row.delivery_status = status;
        if matches!(status, DeliveryStatus::Sent | DeliveryStatus::Failed) {
            row.delivery_attempts += 1;
        }
        row.last_error = error.map(str::to_string);
        Ok(())
    }

    async fn undelivered_notifications(
        &self,
        max_attempts: i64,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .filter(|n| {
                let due = match n.delivery_status {
                    DeliveryStatus::Failed => true,
                    DeliveryStatus::Pending => n.created_at < pending_before,
                    _ => false,
                };
                due && n.delivery_attempts < max_attempts
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn notification_sent_since(
        &self,
        recipient_id: UserId,
        contract_id: Option<ContractId>,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.notifications.iter().any(|n| {
            n.recipient_id == recipient_id
                && n.contract_id == contract_id
                && n.kind == kind
                && n.created_at >= since
        }))
    }
}
