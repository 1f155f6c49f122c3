// Titles, messages and email bodies for workflow notifications

use crate::workflow::status::NotificationKind;
use crate::workflow::types::{ContractSummary, NewNotification, Obligation, UserId};

fn contract_label(contract: &ContractSummary) -> String {
    match &contract.number {
        Some(number) => format!("{} ({})", contract.title, number),
        None => contract.title.clone(),
    }
}

pub fn approval_request(
    recipient_id: UserId,
    contract: &ContractSummary,
    step: i64,
    total_steps: i64,
) -> NewNotification {
    NewNotification {
        recipient_id,
        contract_id: Some(contract.id),
        title: "Contract awaiting your approval".to_string(),
        message: format!(
            "{} is awaiting your approval (step {} of {}).",
            contract_label(contract),
            step,
            total_steps
        ),
        kind: NotificationKind::ApprovalRequest,
    }
}

pub fn fully_approved(recipient_id: UserId, contract: &ContractSummary) -> NewNotification {
    NewNotification {
        recipient_id,
        contract_id: Some(contract.id),
        title: "Contract fully approved".to_string(),
        message: format!("{} has been approved at every workflow step.", contract_label(contract)),
        kind: NotificationKind::FullyApproved,
    }
}

pub fn approval_reminder(
    recipient_id: UserId,
    contract: &ContractSummary,
    step: i64,
    idle_hours: i64,
) -> NewNotification {
    NewNotification {
        recipient_id,
        contract_id: Some(contract.id),
        title: "Reminder: approval pending".to_string(),
        message: format!(
            "{} has been waiting on your approval at step {} for more than {} hours.",
            contract_label(contract),
            step,
            idle_hours
        ),
        kind: NotificationKind::ApprovalReminder,
    }
}

pub fn approval_escalation(
    recipient_id: UserId,
    contract: &ContractSummary,
    step: i64,
    idle_days: i64,
) -> NewNotification {
    NewNotification {
        recipient_id,
        contract_id: Some(contract.id),
        title: "Approval stalled".to_string(),
        message: format!(
            "{} has not moved past step {} in over {} days.",
            contract_label(contract),
            step,
            idle_days
        ),
        kind: NotificationKind::ApprovalEscalation,
    }
}

pub fn obligation_due(
    recipient_id: UserId,
    obligation: &Obligation,
    contract: &ContractSummary,
) -> NewNotification {
    NewNotification {
        recipient_id,
        contract_id: Some(contract.id),
        title: format!("Obligation due: {}", obligation.title),
        message: format!(
            "'{}' under {} is due on {}.",
            obligation.title,
            contract_label(contract),
            obligation.due_date
        ),
        kind: NotificationKind::ObligationDue,
    }
}

pub fn obligation_overdue(
    recipient_id: UserId,
    obligation: &Obligation,
    contract: &ContractSummary,
) -> NewNotification {
    NewNotification {
        recipient_id,
        contract_id: Some(contract.id),
        title: format!("Obligation overdue: {}", obligation.title),
        message: format!(
            "'{}' under {} was due on {} and is still open.",
            obligation.title,
            contract_label(contract),
            obligation.due_date
        ),
        kind: NotificationKind::ObligationOverdue,
    }
}

/// Subject and HTML body of the negotiation-started email.
pub fn negotiation_started_email(
    contract: &ContractSummary,
    initiator_name: &str,
    comment: Option<&str>,
    app_base_url: &str,
) -> (String, String) {
    let subject = format!("Negotiation started: {}", contract_label(contract));
    let comment_html = comment
        .filter(|c| !c.trim().is_empty())
        .map(|c| format!("<p><strong>Comment:</strong> {}</p>", escape_html(c)))
        .unwrap_or_default();
    let body = format!(
        "<p>{initiator} started negotiation on <strong>{label}</strong>.</p>{comment_html}\
         <p><a href=\"{base}/contracts/{id}\">Open the contract</a></p>",
        initiator = escape_html(initiator_name),
        label = escape_html(&contract_label(contract)),
        base = app_base_url.trim_end_matches('/'),
        id = contract.id,
    );
    (subject, body)
}

/// HTML body for a persisted notification.
pub fn notification_email(title: &str, message: &str, app_base_url: &str) -> String {
    format!(
        "<h3>{}</h3><p>{}</p><p><a href=\"{}/notifications\">View in the app</a></p>",
        escape_html(title),
        escape_html(message),
        app_base_url.trim_end_matches('/')
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> ContractSummary {
        ContractSummary {
            id: 7,
            number: Some("MSA-007".to_string()),
            title: "Master services".to_string(),
        }
    }

    #[test]
    fn approval_request_names_step() {
        let n = approval_request(3, &summary(), 2, 3);
        assert_eq!(n.kind, NotificationKind::ApprovalRequest);
        assert_eq!(n.contract_id, Some(7));
        assert!(n.message.contains("Master services (MSA-007)"));
        assert!(n.message.contains("step 2 of 3"));
    }

    #[test]
    fn negotiation_email_escapes_comment() {
        let (subject, body) = negotiation_started_email(
            &summary(),
            "Ana <Legal>",
            Some("<script>x</script>"),
            "https://clm.example.com/",
        );
        assert_eq!(subject, "Negotiation started: Master services (MSA-007)");
        assert!(body.contains("Ana &lt;Legal&gt;"));
        assert!(body.contains("&lt;script&gt;"));
        assert!(body.contains("https://clm.example.com/contracts/7"));
    }
}
