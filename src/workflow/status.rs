//! Closed status vocabularies.
//!
//! Every label that ends up in a status column goes through one of these
//! types. Parsing is strict: a label the crate does not know is an error, so a
//! stray string can never be written back to the store.
//!
//! Contract columns are also written by flows outside this crate. Those are
//! read back through [`Label`], which keeps unknown labels verbatim instead of
//! failing the row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label: '{value}'")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a string-backed enum with `as_str`, `Display` and `FromStr`.
///
/// Extra `alias => Variant` pairs are accepted when parsing only.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $label:literal),+ $(,)?
        }
        $(aliases { $($alias:literal => $alias_variant:ident),+ $(,)? })?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    $($($alias => Ok($name::$alias_variant),)+)?
                    other => Err(ParseStatusError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

labelled_enum! {
    /// Lifecycle label on `contracts.status`.
    ContractStatus, "contract status" {
        Draft => "draft",
        Review => "review",
        ReviewCompleted => "review_completed",
        Negotiation => "negotiation",
        NegotiationCompleted => "negotiation_completed",
        CounterpartyInternalReview => "counterparty_internal_review",
        CounterpartyReviewCompleted => "counterparty_review_completed",
        Approval => "approval",
        Approved => "approved",
        Signature => "signature",
        Executed => "executed",
        Expired => "expired",
        Terminated => "terminated",
    }
}

labelled_enum! {
    /// Finer-grained label on `contracts.approval_status`.
    ApprovalStatus, "approval status" {
        Pending => "pending",
        Negotiation => "negotiation",
        ReviewCompleted => "review_completed",
        CounterpartyReviewCompleted => "counterparty_review_completed",
        Approved => "approved",
        InitiatorTeamRejected => "initiator_team_rejected",
        CounterpartyTeamRejected => "counterparty_team_rejected",
        ApprovalTeamRejected => "approval_team_rejected",
    }
}

/// A status label as read from a column other flows also write.
///
/// Only the `Known` side is ever written by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label<T> {
    Known(T),
    Other(String),
}

impl<T: FromStr> Label<T> {
    pub fn decode(raw: String) -> Self {
        match raw.parse() {
            Ok(known) => Label::Known(known),
            Err(_) => Label::Other(raw),
        }
    }
}

impl<T> Label<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Label::Known(value) => Some(value),
            Label::Other(_) => None,
        }
    }
}

impl<T> From<T> for Label<T> {
    fn from(value: T) -> Self {
        Label::Known(value)
    }
}

impl<T: fmt::Display> fmt::Display for Label<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Known(value) => value.fmt(f),
            Label::Other(raw) => f.write_str(raw),
        }
    }
}

macro_rules! label_eq {
    ($($name:ident),+) => {
        $(
            impl PartialEq<$name> for Label<$name> {
                fn eq(&self, other: &$name) -> bool {
                    matches!(self, Label::Known(value) if value == other)
                }
            }
        )+
    };
}

label_eq!(ContractStatus, ApprovalStatus, ContractWorkflowStatus);

labelled_enum! {
    /// `contracts.workflow_status`, the contract-side view of its workflow.
    ContractWorkflowStatus, "contract workflow status" {
        Pending => "pending",
        Active => "active",
        Completed => "completed",
    }
    aliases { "in_progress" => Active }
}

labelled_enum! {
    /// `workflow_instances.status`.
    InstanceStatus, "instance status" {
        Pending => "pending",
        Active => "active",
        Completed => "completed",
    }
    aliases { "in_progress" => Active }
}

impl InstanceStatus {
    /// Statuses an instance can be acted on from.
    pub const ACTIONABLE: [InstanceStatus; 2] = [InstanceStatus::Active, InstanceStatus::Pending];

    pub fn is_actionable(&self) -> bool {
        !matches!(self, InstanceStatus::Completed)
    }
}

labelled_enum! {
    /// The approver's decision.
    DecisionAction, "decision action" {
        Approve => "approve",
        Reject => "reject",
    }
}

labelled_enum! {
    /// `audit_logs.action_type`.
    AuditAction, "audit action" {
        Approve => "approve",
        Reject => "reject",
        WorkflowApproval => "workflow_approval",
        WorkflowRejection => "workflow_rejection",
        NegotiationInitiated => "negotiation_initiated",
    }
}

impl AuditAction {
    /// Action types that make up a contract's workflow history.
    pub const HISTORY: [AuditAction; 4] = [
        AuditAction::Approve,
        AuditAction::Reject,
        AuditAction::WorkflowApproval,
        AuditAction::WorkflowRejection,
    ];
}

impl From<DecisionAction> for AuditAction {
    fn from(action: DecisionAction) -> Self {
        match action {
            DecisionAction::Approve => AuditAction::Approve,
            DecisionAction::Reject => AuditAction::Reject,
        }
    }
}

labelled_enum! {
    /// `notifications.type`.
    NotificationKind, "notification kind" {
        ApprovalRequest => "approval_request",
        FullyApproved => "fully_approved",
        ApprovalReminder => "approval_reminder",
        ApprovalEscalation => "approval_escalation",
        ObligationDue => "obligation_due",
        ObligationOverdue => "obligation_overdue",
        NegotiationStarted => "negotiation_started",
    }
}

labelled_enum! {
    /// Email delivery state of a persisted notification.
    DeliveryStatus, "delivery status" {
        Pending => "pending",
        Sent => "sent",
        Failed => "failed",
        Skipped => "skipped",
    }
}

labelled_enum! {
    /// `obligations.status`.
    ObligationStatus, "obligation status" {
        Open => "open",
        Fulfilled => "fulfilled",
        Waived => "waived",
    }
}

/// The review stage a decision belongs to.
///
/// Unlike the status columns this arrives from callers and unknown values are
/// legal: they complete or reject nothing on the contract side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestType {
    InternalReview,
    CounterpartyReview,
    CounterpartyInternalReview,
    Approval,
    Unrecognized(String),
}

impl RequestType {
    pub fn as_str(&self) -> &str {
        match self {
            RequestType::InternalReview => "internal_review",
            RequestType::CounterpartyReview => "counterparty_review",
            RequestType::CounterpartyInternalReview => "counterparty_internal_review",
            RequestType::Approval => "approval",
            RequestType::Unrecognized(raw) => raw,
        }
    }
}

impl From<&str> for RequestType {
    fn from(raw: &str) -> Self {
        match raw.trim() {
            "internal_review" => RequestType::InternalReview,
            "counterparty_review" => RequestType::CounterpartyReview,
            "counterparty_internal_review" => RequestType::CounterpartyInternalReview,
            "approval" => RequestType::Approval,
            other => RequestType::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RequestType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RequestType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(RequestType::from(raw.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_is_an_alias_for_active() {
        assert_eq!("in_progress".parse::<InstanceStatus>().unwrap(), InstanceStatus::Active);
        assert_eq!(InstanceStatus::Active.as_str(), "active");
        assert_eq!(
            "in_progress".parse::<ContractWorkflowStatus>().unwrap(),
            ContractWorkflowStatus::Active
        );
    }

    #[test]
    fn unknown_labels_are_rejected() {
        let err = "archived".parse::<ContractStatus>().unwrap_err();
        assert_eq!(err.kind, "contract status");
        assert_eq!(err.value, "archived");
        assert!("".parse::<ApprovalStatus>().is_err());
        assert!("maybe".parse::<DecisionAction>().is_err());
    }

    #[test]
    fn labels_survive_display_and_parse() {
        for status in [
            ContractStatus::Draft,
            ContractStatus::CounterpartyInternalReview,
            ContractStatus::NegotiationCompleted,
            ContractStatus::Approved,
        ] {
            assert_eq!(status.to_string().parse::<ContractStatus>().unwrap(), status);
        }
    }

    #[test]
    fn contract_labels_keep_foreign_values() {
        let known = Label::<ContractStatus>::decode("approval".to_string());
        assert_eq!(known, ContractStatus::Approval);
        assert_eq!(known.known(), Some(&ContractStatus::Approval));

        let foreign = Label::<ApprovalStatus>::decode("pending_legal".to_string());
        assert_eq!(foreign, Label::Other("pending_legal".to_string()));
        assert_ne!(foreign, ApprovalStatus::Pending);
        assert_eq!(foreign.known(), None);
        assert_eq!(foreign.to_string(), "pending_legal");
    }

    #[test]
    fn request_type_keeps_unknown_values() {
        assert_eq!(RequestType::from("approval"), RequestType::Approval);
        let other = RequestType::from("legal_review");
        assert_eq!(other, RequestType::Unrecognized("legal_review".to_string()));
        assert_eq!(other.as_str(), "legal_review");

        let parsed: RequestType = serde_json::from_str("\"internal_review\"").unwrap();
        assert_eq!(parsed, RequestType::InternalReview);
    }

    #[test]
    fn decision_actions_map_to_audit_actions() {
        assert_eq!(AuditAction::from(DecisionAction::Approve), AuditAction::Approve);
        assert_eq!(AuditAction::from(DecisionAction::Reject), AuditAction::Reject);
        assert!(!AuditAction::HISTORY.contains(&AuditAction::NegotiationInitiated));
    }
}
