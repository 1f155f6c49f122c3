use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::email::{is_deliverable_address, EmailSender};
use super::templates;
use super::NotificationError;
use crate::config::NotificationConfig;
use crate::observability::WorkflowMetrics;
use crate::store::WorkflowStore;
use crate::workflow::status::DeliveryStatus;
use crate::workflow::types::{NewNotification, Notification, User};

/// Persists notifications and delivers them by email.
///
/// Every notification is written to the store first with delivery status
/// `pending`; the email attempt then moves it to `sent`, `failed` or
/// `skipped`. Failed rows are picked up again by the delivery retry job.
pub struct NotificationDispatcher<S: WorkflowStore> {
    store: Arc<S>,
    email: Arc<dyn EmailSender>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    config: NotificationConfig,
    metrics: Arc<WorkflowMetrics>,
}

impl<S: WorkflowStore> NotificationDispatcher<S> {
    pub fn new(
        store: Arc<S>,
        email: Arc<dyn EmailSender>,
        config: NotificationConfig,
        metrics: Arc<WorkflowMetrics>,
    ) -> Self {
        let per_second = NonZeroU32::new(config.emails_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));
        Self {
            store,
            email,
            rate_limiter,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Persist `draft` and attempt delivery.
    ///
    /// Returns the stored row as it was inserted. Delivery failures are
    /// recorded on the row and reported as errors, but the row stays.
    pub async fn notify(&self, draft: NewNotification) -> Result<Notification, NotificationError> {
        let notification = self.store.insert_notification(draft).await?;
        debug!(
            notification.id = notification.id,
            recipient.id = notification.recipient_id,
            kind = %notification.kind,
            "Notification persisted"
        );
        self.deliver(&notification).await?;
        Ok(notification)
    }

    /// Notify every draft, logging failures instead of returning them.
    ///
    /// Returns how many notifications were persisted.
    pub async fn notify_all(&self, drafts: Vec<NewNotification>) -> usize {
        let mut persisted = 0;
        for draft in drafts {
            let recipient_id = draft.recipient_id;
            let kind = draft.kind;
            match self.notify(draft).await {
                Ok(_) => persisted += 1,
                Err(err) => {
                    if !matches!(err, NotificationError::Store(_)) {
                        persisted += 1;
                    }
                    warn!(
                        recipient.id = recipient_id,
                        kind = %kind,
                        error = %err,
                        "Notification failed"
                    );
                }
            }
        }
        persisted
    }

    /// Attempt email delivery of a stored notification and record the result.
    pub async fn deliver(
        &self,
        notification: &Notification,
    ) -> Result<DeliveryStatus, NotificationError> {
        if !self.config.email_enabled {
            self.store
                .record_delivery(notification.id, DeliveryStatus::Skipped, Some("email disabled"))
                .await?;
            return Ok(DeliveryStatus::Skipped);
        }

        let Some(recipient) = self.store.get_user(notification.recipient_id).await? else {
            self.store
                .record_delivery(
                    notification.id,
                    DeliveryStatus::Skipped,
                    Some("recipient not found"),
                )
                .await?;
            return Err(NotificationError::NoRecipient {
                user_id: notification.recipient_id,
            });
        };

        let Some(address) = deliverable_address(&recipient) else {
            self.store
                .record_delivery(
                    notification.id,
                    DeliveryStatus::Skipped,
                    Some("recipient has no deliverable email address"),
                )
                .await?;
            return Ok(DeliveryStatus::Skipped);
        };

        let body = templates::notification_email(
            &notification.title,
            &notification.message,
            &self.config.app_base_url,
        );
        match self.send(address, &notification.title, &body).await {
            Ok(()) => {
                self.store
                    .record_delivery(notification.id, DeliveryStatus::Sent, None)
                    .await?;
                Ok(DeliveryStatus::Sent)
            }
            Err(err) => {
                let message = err.to_string();
                self.store
                    .record_delivery(notification.id, DeliveryStatus::Failed, Some(&message))
                    .await?;
                Err(err)
            }
        }
    }

    /// Send an email that is not backed by a stored notification.
    pub async fn send_direct(
        &self,
        to: &User,
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotificationError> {
        if !self.config.email_enabled {
            debug!(recipient.id = to.id, "Email disabled, direct email dropped");
            return Ok(());
        }
        let address = deliverable_address(to).ok_or_else(|| NotificationError::NoRecipient {
            user_id: to.id,
        })?;
        self.send(address, subject, html_body).await
    }

    async fn send(&self, address: &str, subject: &str, html_body: &str) -> Result<(), NotificationError> {
        self.rate_limiter.until_ready().await;
        match self.email.send_email(address, subject, html_body).await {
            Ok(()) => {
                self.metrics.record_notification_sent();
                info!(to = %address, subject = %subject, "Email sent");
                Ok(())
            }
            Err(err) => {
                self.metrics.record_notification_failure();
                Err(err.into())
            }
        }
    }
}

fn deliverable_address(user: &User) -> Option<&str> {
    user.email
        .as_deref()
        .map(str::trim)
        .filter(|address| is_deliverable_address(address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::email::{EmailError, MockEmailSender};
    use crate::store::{FailPoint, MemoryStore};
    use crate::workflow::status::NotificationKind;

    fn user(id: i64, email: Option<&str>) -> User {
        User {
            id,
            company_id: 1,
            name: format!("User {id}"),
            email: email.map(str::to_string),
            role: None,
            department: None,
        }
    }

    fn draft(recipient_id: i64) -> NewNotification {
        NewNotification {
            recipient_id,
            contract_id: Some(5),
            title: "Contract awaiting your approval".into(),
            message: "Supply agreement is awaiting your approval.".into(),
            kind: NotificationKind::ApprovalRequest,
        }
    }

    fn dispatcher(
        store: Arc<MemoryStore>,
        email: MockEmailSender,
        email_enabled: bool,
    ) -> NotificationDispatcher<MemoryStore> {
        let config = NotificationConfig {
            email_enabled,
            emails_per_second: 100,
            ..NotificationConfig::default()
        };
        NotificationDispatcher::new(store, Arc::new(email), config, Arc::new(WorkflowMetrics::new()))
    }

    #[tokio::test]
    async fn delivered_notification_is_marked_sent() {
        let store = Arc::new(MemoryStore::new());
        store.add_user(user(2, Some("approver@example.com"))).await;

        let mut email = MockEmailSender::new();
        email
            .expect_send_email()
            .withf(|to, subject, _| to == "approver@example.com" && subject.contains("approval"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let dispatcher = dispatcher(store.clone(), email, true);
        dispatcher.notify(draft(2)).await.unwrap();

        let rows = store.notifications().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].delivery_status, DeliveryStatus::Sent);
        assert_eq!(rows[0].delivery_attempts, 1);
        assert!(!rows[0].read);
    }

    #[tokio::test]
    async fn transport_failure_keeps_the_row_as_failed() {
        let store = Arc::new(MemoryStore::new());
        store.add_user(user(2, Some("approver@example.com"))).await;

        let mut email = MockEmailSender::new();
        email.expect_send_email().times(1).returning(|_, _, _| {
            Err(EmailError::Transport {
                message: "connection reset".into(),
            })
        });

        let dispatcher = dispatcher(store.clone(), email, true);
        let err = dispatcher.notify(draft(2)).await.unwrap_err();
        assert!(matches!(err, NotificationError::Email(_)));

        let rows = store.notifications().await;
        assert_eq!(rows[0].delivery_status, DeliveryStatus::Failed);
        assert_eq!(rows[0].delivery_attempts, 1);
        assert!(rows[0].last_error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn missing_address_is_skipped_without_sending() {
        let store = Arc::new(MemoryStore::new());
        store.add_user(user(3, None)).await;

        let mut email = MockEmailSender::new();
        email.expect_send_email().times(0);

        let dispatcher = dispatcher(store.clone(), email, true);
        dispatcher.notify(draft(3)).await.unwrap();

        let rows = store.notifications().await;
        assert_eq!(rows[0].delivery_status, DeliveryStatus::Skipped);
        assert_eq!(rows[0].delivery_attempts, 0);
    }

    #[tokio::test]
    async fn disabled_email_still_persists() {
        let store = Arc::new(MemoryStore::new());
        store.add_user(user(2, Some("approver@example.com"))).await;

        let mut email = MockEmailSender::new();
        email.expect_send_email().times(0);

        let dispatcher = dispatcher(store.clone(), email, false);
        dispatcher.notify(draft(2)).await.unwrap();

        let rows = store.notifications().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].delivery_status, DeliveryStatus::Skipped);
    }

    #[tokio::test]
    async fn notify_all_continues_past_failures() {
        let store = Arc::new(MemoryStore::new());
        store.add_user(user(2, Some("a@example.com"))).await;
        store.add_user(user(3, Some("b@example.com"))).await;
        store.fail_once(FailPoint::NotificationInsert);

        let mut email = MockEmailSender::new();
        email.expect_send_email().times(1).returning(|_, _, _| Ok(()));

        let dispatcher = dispatcher(store.clone(), email, true);
        let persisted = dispatcher.notify_all(vec![draft(2), draft(3)]).await;

        assert_eq!(persisted, 1);
        let rows = store.notifications().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipient_id, 3);
    }
}
