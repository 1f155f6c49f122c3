//! Notification outbox and email delivery.

pub mod dispatcher;
pub mod email;
pub mod templates;

pub use dispatcher::NotificationDispatcher;
pub use email::{EmailError, EmailSender, LogEmailSender, RecordingEmailSender, SentEmail};

use thiserror::Error;

use crate::store::StoreError;
use crate::workflow::types::UserId;

/// A notification could not be persisted or delivered.
///
/// Never returned from a workflow decision; callers log it and move on.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("user {user_id} cannot receive email")]
    NoRecipient { user_id: UserId },
}
