use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::notifications::{templates, NotificationDispatcher};
use crate::store::{StoreError, WorkflowStore};
use crate::workflow::status::NotificationKind;
use crate::workflow::types::{NewNotification, ObligationDue, StalledApproval, User};

/// Upper bound on notifications redelivered per retry run.
const RETRY_BATCH: i64 = 200;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor store error: {0}")]
    Store(#[from] StoreError),
}

/// The periodic jobs, in the order of their interval length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum MonitorJob {
    /// Redeliver pending and failed notifications (hourly)
    DeliveryRetry,
    /// Remind assignees of idle approvals (every six hours)
    ApprovalReminders,
    /// Remind owners of due and overdue obligations (daily)
    ObligationScan,
    /// Escalate long-stalled approvals to the contract creator (weekly)
    ApprovalEscalations,
}

impl MonitorJob {
    pub const ALL: [MonitorJob; 4] = [
        MonitorJob::DeliveryRetry,
        MonitorJob::ApprovalReminders,
        MonitorJob::ObligationScan,
        MonitorJob::ApprovalEscalations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorJob::DeliveryRetry => "delivery_retry",
            MonitorJob::ApprovalReminders => "approval_reminders",
            MonitorJob::ObligationScan => "obligation_scan",
            MonitorJob::ApprovalEscalations => "approval_escalations",
        }
    }

    pub fn interval_seconds(&self, config: &MonitorConfig) -> u64 {
        match self {
            MonitorJob::DeliveryRetry => config.delivery_retry_interval_seconds,
            MonitorJob::ApprovalReminders => config.approval_reminder_interval_seconds,
            MonitorJob::ObligationScan => config.obligation_scan_interval_seconds,
            MonitorJob::ApprovalEscalations => config.escalation_interval_seconds,
        }
    }
}

impl std::fmt::Display for MonitorJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one job run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job: MonitorJob,
    /// Rows the job looked at
    pub examined: usize,
    /// Notifications persisted or redelivered
    pub notified: usize,
}

/// Dependencies shared by every monitor job.
pub struct MonitorContext<S: WorkflowStore> {
    store: Arc<S>,
    dispatcher: Arc<NotificationDispatcher<S>>,
    config: MonitorConfig,
}

impl<S: WorkflowStore> MonitorContext<S> {
    pub fn new(store: Arc<S>, dispatcher: Arc<NotificationDispatcher<S>>, config: MonitorConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub async fn run(&self, job: MonitorJob, now: DateTime<Utc>) -> Result<JobReport, MonitorError> {
        match job {
            MonitorJob::DeliveryRetry => self.retry_deliveries(now).await,
            MonitorJob::ApprovalReminders => self.approval_reminders(now).await,
            MonitorJob::ObligationScan => self.obligation_scan(now).await,
            MonitorJob::ApprovalEscalations => self.approval_escalations(now).await,
        }
    }

    async fn retry_deliveries(&self, now: DateTime<Utc>) -> Result<JobReport, MonitorError> {
        let max_attempts = self.dispatcher.config().max_delivery_attempts;
        // Younger pending rows may still be queued behind the rate limiter.
        let pending_before = now - Duration::seconds(self.config.pending_retry_grace_seconds);
        let pending = self
            .store
            .undelivered_notifications(max_attempts, pending_before, RETRY_BATCH)
            .await?;

        let mut delivered = 0;
        for notification in &pending {
            match self.dispatcher.deliver(notification).await {
                Ok(status) => {
                    debug!(notification.id = notification.id, status = %status, "Redelivery attempted");
                    delivered += 1;
                }
                Err(err) => warn!(
                    notification.id = notification.id,
                    attempts = notification.delivery_attempts + 1,
                    error = %err,
                    "Redelivery failed"
                ),
            }
        }

        Ok(JobReport {
            job: MonitorJob::DeliveryRetry,
            examined: pending.len(),
            notified: delivered,
        })
    }

    async fn stalled_with_assignees(
        &self,
        idle_since: DateTime<Utc>,
    ) -> Result<Vec<(StalledApproval, Vec<User>)>, StoreError> {
        let mut snapshot = self.store.begin_snapshot().await?;
        let result = async {
            let stalled = self.store.stalled_approvals(&mut snapshot, idle_since).await?;
            let mut with_assignees = Vec::with_capacity(stalled.len());
            for approval in stalled {
                let assignees = self
                    .store
                    .step_assignees(
                        &mut snapshot,
                        approval.instance.workflow_id,
                        approval.instance.current_step,
                        approval.contract.company_id,
                    )
                    .await?;
                with_assignees.push((approval, assignees));
            }
            Ok::<_, StoreError>(with_assignees)
        }
        .await;
        self.store.abort_snapshot(snapshot).await?;
        result
    }

    async fn approval_reminders(&self, now: DateTime<Utc>) -> Result<JobReport, MonitorError> {
        let idle_hours = self.config.approval_reminder_after_hours;
        let idle_since = now - Duration::hours(idle_hours);
        let stalled = self.stalled_with_assignees(idle_since).await?;

        let mut drafts = Vec::new();
        for (approval, assignees) in &stalled {
            let summary = approval.contract.summary();
            for assignee in assignees {
                if self
                    .already_notified(assignee.id, approval, NotificationKind::ApprovalReminder, idle_since)
                    .await?
                {
                    continue;
                }
                drafts.push(templates::approval_reminder(
                    assignee.id,
                    &summary,
                    approval.instance.current_step,
                    idle_hours,
                ));
            }
        }

        let notified = self.dispatcher.notify_all(drafts).await;
        Ok(JobReport {
            job: MonitorJob::ApprovalReminders,
            examined: stalled.len(),
            notified,
        })
    }

    async fn approval_escalations(&self, now: DateTime<Utc>) -> Result<JobReport, MonitorError> {
        let idle_days = self.config.escalation_after_days;
        let idle_since = now - Duration::days(idle_days);
        let stalled = self.stalled_with_assignees(idle_since).await?;

        let mut drafts = Vec::new();
        for (approval, _) in &stalled {
            let creator = approval.contract.created_by;
            if self
                .already_notified(creator, approval, NotificationKind::ApprovalEscalation, idle_since)
                .await?
            {
                continue;
            }
            drafts.push(templates::approval_escalation(
                creator,
                &approval.contract.summary(),
                approval.instance.current_step,
                idle_days,
            ));
        }

        let notified = self.dispatcher.notify_all(drafts).await;
        Ok(JobReport {
            job: MonitorJob::ApprovalEscalations,
            examined: stalled.len(),
            notified,
        })
    }

    async fn already_notified(
        &self,
        recipient_id: i64,
        approval: &StalledApproval,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.store
            .notification_sent_since(recipient_id, Some(approval.contract.id), kind, since)
            .await
    }

    async fn obligation_scan(&self, now: DateTime<Utc>) -> Result<JobReport, MonitorError> {
        let today = now.date_naive();
        let due_by = today + Duration::days(self.config.obligation_lookahead_days);
        let start_of_day = today.and_time(NaiveTime::MIN).and_utc();

        // Claim today's reminders first so a second run the same day finds nothing.
        let mut snapshot = self.store.begin_snapshot().await?;
        let claimed = async {
            let due = self
                .store
                .obligations_due(&mut snapshot, due_by, start_of_day)
                .await?;
            for item in &due {
                self.store
                    .mark_obligation_reminded(&mut snapshot, item.obligation.id, now)
                    .await?;
            }
            Ok::<_, StoreError>(due)
        }
        .await;
        let due = match claimed {
            Ok(due) => {
                self.store.commit_snapshot(snapshot).await?;
                due
            }
            Err(err) => {
                self.store.abort_snapshot(snapshot).await?;
                return Err(err.into());
            }
        };

        let drafts: Vec<NewNotification> = due
            .iter()
            .flat_map(|item| obligation_drafts(item, today))
            .collect();
        let notified = self.dispatcher.notify_all(drafts).await;

        info!(
            due = due.len(),
            notified,
            due_by = %due_by,
            "Obligation scan finished"
        );
        Ok(JobReport {
            job: MonitorJob::ObligationScan,
            examined: due.len(),
            notified,
        })
    }
}

fn obligation_drafts(item: &ObligationDue, today: chrono::NaiveDate) -> Vec<NewNotification> {
    let obligation = &item.obligation;
    if obligation.due_date >= today {
        return vec![templates::obligation_due(obligation.owner_id, obligation, &item.contract)];
    }

    let mut drafts = vec![templates::obligation_overdue(
        obligation.owner_id,
        obligation,
        &item.contract,
    )];
    if item.contract_creator != obligation.owner_id {
        drafts.push(templates::obligation_overdue(
            item.contract_creator,
            obligation,
            &item.contract,
        ));
    }
    drafts
}
