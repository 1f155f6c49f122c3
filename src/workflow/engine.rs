use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

use super::errors::WorkflowError;
use super::status::{
    ApprovalStatus, AuditAction, ContractStatus, DecisionAction, RequestType,
};
use super::transition::{self, FollowUp, TransitionKind, TransitionPlan};
use super::types::{
    ActionDetails, Actor, CompanyId, Contract, ContractId, ContractStatusUpdate, ContractSummary,
    HistoryEntry, NewAuditRecord, NewNotification, Outcome, User, WorkflowInstance,
};
use crate::notifications::{templates, NotificationDispatcher};
use crate::observability::{OperationTimer, WorkflowMetrics};
use crate::store::{StoreError, WorkflowStore};
use crate::telemetry::create_workflow_span;

/// An approver's decision on a contract, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub contract_id: ContractId,
    pub action: DecisionAction,
    pub request_type: RequestType,
    pub comment: Option<String>,
}

impl Decision {
    /// Validate raw request values. Only the action is closed; any request type is accepted.
    pub fn parse(
        contract_id: ContractId,
        action: &str,
        request_type: &str,
        comment: Option<String>,
    ) -> Result<Self, WorkflowError> {
        let action = action
            .trim()
            .parse::<DecisionAction>()
            .map_err(|_| WorkflowError::InvalidAction {
                action: action.to_string(),
            })?;
        Ok(Self {
            contract_id,
            action,
            request_type: RequestType::from(request_type),
            comment: comment.filter(|c| !c.trim().is_empty()),
        })
    }
}

/// A contract's decision history, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowHistory {
    pub contract: ContractSummary,
    pub entries: Vec<HistoryEntry>,
}

/// Everything a committed decision needs for its follow-up.
struct AppliedDecision {
    instance: WorkflowInstance,
    total_steps: i64,
    plan: TransitionPlan,
    contract: Contract,
    next_assignees: Vec<User>,
}

/// Drives workflow instances through their steps.
///
/// Each decision runs in one store snapshot: the instance is locked, the
/// transition planned, and contract, instance and audit writes land together
/// or not at all. Notifications go out only after the commit.
pub struct WorkflowEngine<S: WorkflowStore> {
    store: Arc<S>,
    notifier: Arc<NotificationDispatcher<S>>,
    metrics: Arc<WorkflowMetrics>,
}

impl<S: WorkflowStore> WorkflowEngine<S> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<NotificationDispatcher<S>>,
        metrics: Arc<WorkflowMetrics>,
    ) -> Self {
        Self {
            store,
            notifier,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<WorkflowMetrics> {
        &self.metrics
    }

    /// The instance a decision on `contract_id` would act on.
    pub async fn resolve_active_instance(
        &self,
        contract_id: ContractId,
        company_id: CompanyId,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let mut snapshot = self.store.begin_snapshot().await?;
        let found = self
            .store
            .lock_active_instance(&mut snapshot, contract_id, company_id)
            .await;
        self.abort(snapshot, contract_id).await;
        found?.ok_or(WorkflowError::NoActiveWorkflow { contract_id })
    }

    /// Apply an approve/reject decision by `actor`.
    pub async fn decide(&self, actor: &Actor, decision: Decision) -> Result<Outcome, WorkflowError> {
        let span = create_workflow_span("decide", decision.contract_id, actor.company_id, actor.id);
        self.decide_inner(actor, decision).instrument(span).await
    }

    async fn decide_inner(&self, actor: &Actor, decision: Decision) -> Result<Outcome, WorkflowError> {
        let timer = OperationTimer::new("workflow_decision");
        self.metrics.record_decision();
        let contract_id = decision.contract_id;

        let mut snapshot = match self.store.begin_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(source) => return Err(self.transaction_failed(actor, &decision, source)),
        };

        let applied = match self.apply_decision(&mut snapshot, actor, &decision).await {
            Ok(Some(applied)) => applied,
            Ok(None) => {
                self.abort(snapshot, contract_id).await;
                info!(action = %decision.action, "No active workflow for contract");
                return Err(WorkflowError::NoActiveWorkflow { contract_id });
            }
            Err(source) => {
                self.abort(snapshot, contract_id).await;
                return Err(self.transaction_failed(actor, &decision, source));
            }
        };

        if let Err(source) = self.store.commit_snapshot(snapshot).await {
            return Err(self.transaction_failed(actor, &decision, source));
        }

        self.record_metrics(&applied.plan);
        info!(
            action = %decision.action,
            request_type = %decision.request_type,
            transition = ?applied.plan.kind,
            "Workflow decision committed"
        );

        let outcome = Outcome {
            contract_id,
            message: outcome_message(&applied),
            current_step: applied.plan.instance.map(|change| change.current_step),
            instance_status: applied.plan.instance.map(|change| change.status),
        };

        self.notify_follow_up(&applied).await;
        timer.finish();
        Ok(outcome)
    }

    /// Lock, plan and write one decision. `Ok(None)` means no instance qualified.
    async fn apply_decision(
        &self,
        snapshot: &mut S::Snapshot,
        actor: &Actor,
        decision: &Decision,
    ) -> Result<Option<AppliedDecision>, StoreError> {
        let contract_id = decision.contract_id;
        let Some(instance) = self
            .store
            .lock_active_instance(snapshot, contract_id, actor.company_id)
            .await?
        else {
            return Ok(None);
        };

        let total_steps = self
            .store
            .count_approval_steps(snapshot, instance.workflow_id)
            .await?;
        let plan = transition::plan(&instance, total_steps, decision.action, &decision.request_type);
        debug!(
            instance.id = instance.id,
            current_step = instance.current_step,
            total_steps,
            transition = ?plan.kind,
            "Transition planned"
        );

        let contract = self
            .store
            .contract_in_snapshot(snapshot, contract_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "contract",
                id: contract_id,
            })?;

        self.store
            .insert_audit_record(
                snapshot,
                NewAuditRecord {
                    user_id: actor.id,
                    contract_id,
                    action_type: plan.audit_action,
                    details: ActionDetails {
                        comment: decision.comment.clone(),
                        step: Some(plan.audited_step),
                        actor_name: Some(actor.name.clone()),
                        request_type: Some(decision.request_type.to_string()),
                        timestamp: Some(Utc::now()),
                    },
                },
            )
            .await?;

        if !plan.contract.is_empty() {
            self.store
                .update_contract_status(snapshot, contract_id, &plan.contract)
                .await?;
        }

        if let Some(change) = plan.instance {
            self.store
                .update_instance(
                    snapshot,
                    instance.id,
                    instance.current_step,
                    change.current_step,
                    change.status,
                )
                .await?;
        }

        let next_assignees = match plan.follow_up {
            FollowUp::NotifyAssignees { step } => {
                self.store
                    .step_assignees(snapshot, instance.workflow_id, step, actor.company_id)
                    .await?
            }
            FollowUp::NotifyCreator | FollowUp::Nothing => Vec::new(),
        };

        Ok(Some(AppliedDecision {
            instance,
            total_steps,
            plan,
            contract,
            next_assignees,
        }))
    }

    async fn notify_follow_up(&self, applied: &AppliedDecision) {
        let summary = applied.contract.summary();
        let drafts: Vec<NewNotification> = match applied.plan.follow_up {
            FollowUp::NotifyAssignees { step } => applied
                .next_assignees
                .iter()
                .map(|user| templates::approval_request(user.id, &summary, step, applied.total_steps))
                .collect(),
            FollowUp::NotifyCreator => {
                vec![templates::fully_approved(applied.contract.created_by, &summary)]
            }
            FollowUp::Nothing => Vec::new(),
        };

        if drafts.is_empty() {
            if let FollowUp::NotifyAssignees { step } = applied.plan.follow_up {
                warn!(
                    workflow.id = applied.instance.workflow_id,
                    step, "No same-company assignee for the next step"
                );
            }
            return;
        }
        let expected = drafts.len();
        let persisted = self.notifier.notify_all(drafts).await;
        if persisted < expected {
            warn!(expected, persisted, "Some follow-up notifications were not persisted");
        }
    }

    fn record_metrics(&self, plan: &TransitionPlan) {
        match plan.audit_action {
            AuditAction::Approve => self.metrics.record_approval(),
            AuditAction::Reject => self.metrics.record_rejection(),
            _ => {}
        }
        if matches!(plan.kind, TransitionKind::Completed { .. }) {
            self.metrics.record_completion();
        }
    }

    fn transaction_failed(
        &self,
        actor: &Actor,
        decision: &Decision,
        source: StoreError,
    ) -> WorkflowError {
        let contract_id = decision.contract_id;
        if let StoreError::ConcurrentConflict {
            instance_id,
            expected_step,
        } = source
        {
            self.metrics.record_conflict();
            warn!(
                instance.id = instance_id,
                expected_step, "Decision lost a concurrent update, rolled back"
            );
            return WorkflowError::ConcurrentDecision { contract_id };
        }

        self.metrics.record_transaction_failure();
        error!(
            contract.id = contract_id,
            company.id = actor.company_id,
            actor.id = actor.id,
            action = %decision.action,
            request_type = %decision.request_type,
            error = %source,
            "Workflow transaction failed, rolled back"
        );
        WorkflowError::TransactionFailed {
            contract_id,
            source,
        }
    }

    async fn abort(&self, snapshot: S::Snapshot, contract_id: ContractId) {
        if let Err(err) = self.store.abort_snapshot(snapshot).await {
            warn!(contract.id = contract_id, error = %err, "Snapshot rollback failed");
        }
    }

    /// Move a contract into negotiation and tell the master workflow participants.
    pub async fn initiate_negotiation(
        &self,
        actor: &Actor,
        contract_id: ContractId,
        comment: Option<String>,
    ) -> Result<Outcome, WorkflowError> {
        let span = create_workflow_span("initiate_negotiation", contract_id, actor.company_id, actor.id);
        self.initiate_negotiation_inner(actor, contract_id, comment)
            .instrument(span)
            .await
    }

    async fn initiate_negotiation_inner(
        &self,
        actor: &Actor,
        contract_id: ContractId,
        comment: Option<String>,
    ) -> Result<Outcome, WorkflowError> {
        let comment = comment.filter(|c| !c.trim().is_empty());
        let failed = |source: StoreError| {
            self.metrics.record_transaction_failure();
            error!(
                contract.id = contract_id,
                company.id = actor.company_id,
                actor.id = actor.id,
                error = %source,
                "Negotiation initiation failed, rolled back"
            );
            WorkflowError::TransactionFailed {
                contract_id,
                source,
            }
        };

        let mut snapshot = self.store.begin_snapshot().await.map_err(failed)?;

        let contract = match self.store.contract_in_snapshot(&mut snapshot, contract_id).await {
            Ok(Some(contract)) => contract,
            Ok(None) => {
                self.abort(snapshot, contract_id).await;
                return Err(WorkflowError::ContractNotFound { contract_id });
            }
            Err(source) => {
                self.abort(snapshot, contract_id).await;
                return Err(failed(source));
            }
        };
        if contract.company_id != actor.company_id {
            self.abort(snapshot, contract_id).await;
            warn!("Negotiation requested on another company's contract");
            return Err(WorkflowError::AccessDenied {
                contract_id,
                company_id: actor.company_id,
            });
        }

        let update = ContractStatusUpdate {
            status: Some(ContractStatus::Negotiation),
            approval_status: Some(ApprovalStatus::Negotiation),
            workflow_status: None,
        };
        if let Err(source) = self
            .store
            .update_contract_status(&mut snapshot, contract_id, &update)
            .await
        {
            self.abort(snapshot, contract_id).await;
            return Err(failed(source));
        }

        let audit = NewAuditRecord {
            user_id: actor.id,
            contract_id,
            action_type: AuditAction::NegotiationInitiated,
            details: ActionDetails {
                comment: comment.clone(),
                step: None,
                actor_name: Some(actor.name.clone()),
                request_type: None,
                timestamp: Some(Utc::now()),
            },
        };
        if let Err(err) = self.store.insert_audit_record(&mut snapshot, audit).await {
            warn!(error = %err, "Negotiation audit record not written");
        }

        self.store.commit_snapshot(snapshot).await.map_err(failed)?;
        info!("Negotiation initiated");

        self.email_negotiation_participants(actor, &contract.summary(), comment.as_deref())
            .await;

        Ok(Outcome {
            contract_id,
            message: "Negotiation initiated successfully".to_string(),
            current_step: None,
            instance_status: None,
        })
    }

    async fn email_negotiation_participants(
        &self,
        actor: &Actor,
        contract: &ContractSummary,
        comment: Option<&str>,
    ) {
        let participants = match self.store.master_workflow_participants(actor.company_id).await {
            Ok(participants) => participants,
            Err(err) => {
                warn!(error = %err, "Could not resolve master workflow participants");
                return;
            }
        };

        let (subject, body) = templates::negotiation_started_email(
            contract,
            &actor.name,
            comment,
            &self.notifier.config().app_base_url,
        );
        for participant in &participants {
            if participant.id == actor.id {
                continue;
            }
            if let Err(err) = self.notifier.send_direct(participant, &subject, &body).await {
                warn!(
                    recipient.id = participant.id,
                    error = %err,
                    "Negotiation email not delivered"
                );
            }
        }
    }

    /// Decision history of a contract owned by `company_id`.
    pub async fn history(
        &self,
        actor: &Actor,
        contract_id: ContractId,
    ) -> Result<WorkflowHistory, WorkflowError> {
        let span = create_workflow_span("history", contract_id, actor.company_id, actor.id);
        self.history_inner(actor, contract_id).instrument(span).await
    }

    async fn history_inner(
        &self,
        actor: &Actor,
        contract_id: ContractId,
    ) -> Result<WorkflowHistory, WorkflowError> {
        let contract = self
            .store
            .get_contract(contract_id)
            .await?
            .ok_or(WorkflowError::ContractNotFound { contract_id })?;
        if contract.company_id != actor.company_id {
            warn!("History requested for another company's contract");
            return Err(WorkflowError::AccessDenied {
                contract_id,
                company_id: actor.company_id,
            });
        }
        let entries = self.store.list_history(contract_id).await?;
        debug!(entries = entries.len(), "History loaded");
        Ok(WorkflowHistory {
            contract: contract.summary(),
            entries,
        })
    }
}

fn outcome_message(applied: &AppliedDecision) -> String {
    match applied.plan.kind {
        TransitionKind::Completed { .. } => "Contract fully approved!".to_string(),
        TransitionKind::Advanced { from, to } => {
            if applied.next_assignees.is_empty() {
                format!("Step {from} approved; no approver is assigned to step {to}")
            } else {
                let names: Vec<&str> = applied
                    .next_assignees
                    .iter()
                    .map(|user| user.name.as_str())
                    .collect();
                format!("Sent to {} for further approval", names.join(", "))
            }
        }
        TransitionKind::Reset { .. } | TransitionKind::Recorded => {
            "Rejection comment saved".to_string()
        }
    }
}
