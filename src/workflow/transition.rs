//! Pure transition rules for a decision on a workflow instance.
//!
//! [`plan`] decides *what* a decision does; the engine applies the plan inside
//! one store snapshot. Keeping the rules free of I/O lets them be checked
//! exhaustively.

use super::status::{
    ApprovalStatus, AuditAction, ContractStatus, ContractWorkflowStatus, DecisionAction,
    InstanceStatus, RequestType,
};
use super::types::{ContractStatusUpdate, WorkflowInstance};

/// New step/status for the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceChange {
    pub current_step: i64,
    pub status: InstanceStatus,
}

/// Who hears about the transition once it has committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Assignees of the given step are asked to approve.
    NotifyAssignees { step: i64 },
    /// The contract's creator learns it is fully approved.
    NotifyCreator,
    /// Rejections notify nobody.
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Advanced { from: i64, to: i64 },
    Completed { total_steps: i64 },
    Reset { status: InstanceStatus },
    /// Only the audit record is written.
    Recorded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub kind: TransitionKind,
    pub instance: Option<InstanceChange>,
    pub contract: ContractStatusUpdate,
    pub audit_action: AuditAction,
    /// Step number stored in the audit record.
    pub audited_step: i64,
    pub follow_up: FollowUp,
}

/// Compute the effect of `action` on `instance` for a workflow of `total_steps`
/// approval steps.
pub fn plan(
    instance: &WorkflowInstance,
    total_steps: i64,
    action: DecisionAction,
    request_type: &RequestType,
) -> TransitionPlan {
    match action {
        DecisionAction::Approve => plan_approval(instance, total_steps, request_type),
        DecisionAction::Reject => plan_rejection(instance, request_type),
    }
}

fn plan_approval(
    instance: &WorkflowInstance,
    total_steps: i64,
    request_type: &RequestType,
) -> TransitionPlan {
    let from = instance.current_step;

    if from >= total_steps {
        return TransitionPlan {
            kind: TransitionKind::Completed { total_steps },
            instance: Some(InstanceChange {
                current_step: total_steps + 1,
                status: InstanceStatus::Completed,
            }),
            contract: completion_update(request_type),
            audit_action: AuditAction::Approve,
            audited_step: from,
            follow_up: FollowUp::NotifyCreator,
        };
    }

    let to = from + 1;
    TransitionPlan {
        kind: TransitionKind::Advanced { from, to },
        instance: Some(InstanceChange {
            current_step: to,
            status: instance.status,
        }),
        contract: ContractStatusUpdate::default(),
        audit_action: AuditAction::Approve,
        audited_step: from,
        follow_up: FollowUp::NotifyAssignees { step: to },
    }
}

fn completion_update(request_type: &RequestType) -> ContractStatusUpdate {
    let (status, approval_status) = match request_type {
        RequestType::InternalReview => {
            (ContractStatus::ReviewCompleted, ApprovalStatus::ReviewCompleted)
        }
        RequestType::CounterpartyReview => (
            ContractStatus::CounterpartyReviewCompleted,
            ApprovalStatus::CounterpartyReviewCompleted,
        ),
        RequestType::Approval => (ContractStatus::Approved, ApprovalStatus::Approved),
        RequestType::CounterpartyInternalReview | RequestType::Unrecognized(_) => {
            return ContractStatusUpdate::default()
        }
    };
    ContractStatusUpdate {
        status: Some(status),
        approval_status: Some(approval_status),
        workflow_status: Some(ContractWorkflowStatus::Completed),
    }
}

fn plan_rejection(instance: &WorkflowInstance, request_type: &RequestType) -> TransitionPlan {
    let reset = match request_type {
        RequestType::InternalReview => Some((
            InstanceStatus::Active,
            ContractStatusUpdate {
                status: Some(ContractStatus::Draft),
                approval_status: Some(ApprovalStatus::InitiatorTeamRejected),
                workflow_status: None,
            },
        )),
        RequestType::CounterpartyInternalReview => Some((
            InstanceStatus::Pending,
            ContractStatusUpdate {
                status: Some(ContractStatus::CounterpartyInternalReview),
                approval_status: Some(ApprovalStatus::CounterpartyTeamRejected),
                workflow_status: Some(ContractWorkflowStatus::Pending),
            },
        )),
        RequestType::Approval => Some((
            InstanceStatus::Pending,
            ContractStatusUpdate {
                status: Some(ContractStatus::NegotiationCompleted),
                approval_status: Some(ApprovalStatus::ApprovalTeamRejected),
                workflow_status: Some(ContractWorkflowStatus::Pending),
            },
        )),
        RequestType::CounterpartyReview | RequestType::Unrecognized(_) => None,
    };

    match reset {
        Some((status, contract)) => TransitionPlan {
            kind: TransitionKind::Reset { status },
            instance: Some(InstanceChange {
                current_step: 1,
                status,
            }),
            contract,
            audit_action: AuditAction::Reject,
            audited_step: instance.current_step,
            follow_up: FollowUp::Nothing,
        },
        None => TransitionPlan {
            kind: TransitionKind::Recorded,
            instance: None,
            contract: ContractStatusUpdate::default(),
            audit_action: AuditAction::Reject,
            audited_step: instance.current_step,
            follow_up: FollowUp::Nothing,
        },
    }
}
