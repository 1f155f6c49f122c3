//! Outbound email seam.
//!
//! Delivery itself belongs to an external mail service; the crate only needs
//! `send_email(to, subject, html_body)`.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{LazyLock, Mutex};
use thiserror::Error;
use tracing::info;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmailError {
    #[error("invalid recipient address: {address}")]
    InvalidAddress { address: String },
    #[error("email transport failed: {message}")]
    Transport { message: String },
}

/// Sends a single HTML email.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError>;
}

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// Basic shape check before handing an address to the transport.
pub fn is_deliverable_address(address: &str) -> bool {
    EMAIL_PATTERN.is_match(address.trim())
}

/// Sender that only logs what it would send.
///
/// Used when no mail transport is wired in.
#[derive(Debug, Default)]
pub struct LogEmailSender {
    from_address: String,
}

impl LogEmailSender {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
        }
    }
}

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_email(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError> {
        info!(
            from = %self.from_address,
            to = %to,
            subject = %subject,
            body_bytes = html_body.len(),
            "Email dispatched to log transport"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Sender that keeps every message in memory, optionally failing for some recipients.
#[derive(Debug, Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
    failing_recipients: Mutex<Vec<String>>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `address` fail with a transport error.
    pub fn fail_for(&self, address: &str) {
        if let Ok(mut failing) = self.failing_recipients.lock() {
            failing.push(address.to_string());
        }
    }

    /// Let sends to `address` succeed again.
    pub fn recover(&self, address: &str) {
        if let Ok(mut failing) = self.failing_recipients.lock() {
            failing.retain(|a| a != address);
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_email(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError> {
        let failing = self
            .failing_recipients
            .lock()
            .map(|failing| failing.iter().any(|a| a == to))
            .unwrap_or(false);
        if failing {
            return Err(EmailError::Transport {
                message: format!("mailbox {to} unavailable"),
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentEmail {
                to: to.to_string(),
                subject: subject.to_string(),
                html_body: html_body.to_string(),
            });
        }
        Ok(())
    }
}
