// Row and value types shared by the engine, the stores and the API

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::status::{
    ApprovalStatus, AuditAction, ContractStatus, ContractWorkflowStatus, DeliveryStatus,
    InstanceStatus, Label, NotificationKind, ObligationStatus,
};

pub type ContractId = i64;
pub type CompanyId = i64;
pub type UserId = i64;
pub type WorkflowId = i64;
pub type InstanceId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub company_id: CompanyId,
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub company_id: CompanyId,
    pub party_b_id: Option<CompanyId>,
    pub number: Option<String>,
    pub title: String,
    pub status: Label<ContractStatus>,
    pub approval_status: Option<Label<ApprovalStatus>>,
    pub workflow_status: Option<Label<ContractWorkflowStatus>>,
    pub action_person_id: Option<UserId>,
    pub created_by: UserId,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn summary(&self) -> ContractSummary {
        ContractSummary {
            id: self.id,
            number: self.number.clone(),
            title: self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSummary {
    pub id: ContractId,
    pub number: Option<String>,
    pub title: String,
}

/// A change to the contract's status columns, applied as one write.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractStatusUpdate {
    pub status: Option<ContractStatus>,
    pub approval_status: Option<ApprovalStatus>,
    pub workflow_status: Option<ContractWorkflowStatus>,
}

impl ContractStatusUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.approval_status.is_none() && self.workflow_status.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub company_id: CompanyId,
    pub name: String,
    pub is_active: bool,
    pub is_master: bool,
}

/// Step type excluded from the approval step count.
pub const E_SIGN_AUTHORITY: &str = "e_sign_authority";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: i64,
    pub workflow_id: WorkflowId,
    pub step_number: i64,
    pub step_type: String,
    pub assignee_user_id: Option<UserId>,
}

impl WorkflowStep {
    pub fn is_approval_step(&self) -> bool {
        self.step_type != E_SIGN_AUTHORITY
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub workflow_id: WorkflowId,
    pub contract_id: ContractId,
    pub current_step: i64,
    pub status: InstanceStatus,
    pub is_master: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Structured payload stored in `audit_logs.action_details`.
///
/// Rows written by other flows may carry any subset of these keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDetails {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub step: Option<i64>,
    #[serde(default)]
    pub actor_name: Option<String>,
    #[serde(default)]
    pub request_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditRecord {
    pub user_id: UserId,
    pub contract_id: ContractId,
    pub action_type: AuditAction,
    pub details: ActionDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub user_id: UserId,
    pub contract_id: ContractId,
    pub action_type: AuditAction,
    pub details: ActionDetails,
    pub created_at: DateTime<Utc>,
}

/// One row of a contract's workflow history: an audit record with its actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub record: AuditRecord,
    pub actor: Option<User>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: UserId,
    pub contract_id: Option<ContractId>,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: UserId,
    pub contract_id: Option<ContractId>,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub delivery_status: DeliveryStatus,
    pub delivery_attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: i64,
    pub contract_id: ContractId,
    pub owner_id: UserId,
    pub title: String,
    pub due_date: NaiveDate,
    pub status: ObligationStatus,
    pub last_reminded_at: Option<DateTime<Utc>>,
}

/// An obligation joined with the contract it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ObligationDue {
    pub obligation: Obligation,
    pub contract: ContractSummary,
    pub contract_creator: UserId,
}

/// An instance still waiting on a decision, joined with its contract.
#[derive(Debug, Clone, PartialEq)]
pub struct StalledApproval {
    pub instance: WorkflowInstance,
    pub contract: Contract,
}

/// What a successful decision or initiation reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub contract_id: ContractId,
    pub message: String,
    /// Instance state after the transition, when an instance was involved.
    pub current_step: Option<i64>,
    pub instance_status: Option<InstanceStatus>,
}

/// The user making a request, as resolved by the caller's auth layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: UserId,
    pub company_id: CompanyId,
    pub name: String,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            company_id: user.company_id,
            name: user.name.clone(),
        }
    }
}
