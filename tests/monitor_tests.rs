//! Scheduled monitor jobs against a real SQLite database.

mod fixtures;

use chrono::{Duration, Utc};

use clm_workflow::config::MonitorConfig;
use clm_workflow::monitor::{MonitorContext, MonitorJob};
use clm_workflow::store::{encode_timestamp, SqliteStore};
use fixtures::*;

fn context(db: &TestDb) -> MonitorContext<SqliteStore> {
    MonitorContext::new(db.store.clone(), db.dispatcher.clone(), MonitorConfig::default())
}

#[tokio::test]
async fn stalled_approval_reminds_current_assignee_once() {
    let db = empty_seeded_with_idle_instance(Duration::hours(30)).await;
    let monitor = context(&db);

    let report = monitor.run(MonitorJob::ApprovalReminders, Utc::now()).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.notified, 1);
    assert_eq!(recipients(db.pool(), "approval_reminder").await, vec![FIRST_APPROVER]);

    let again = monitor.run(MonitorJob::ApprovalReminders, Utc::now()).await.unwrap();
    assert_eq!(again.examined, 1);
    assert_eq!(again.notified, 0);
}

#[tokio::test]
async fn recent_activity_is_not_reminded() {
    let db = seeded_db(1).await;
    let report = context(&db)
        .run(MonitorJob::ApprovalReminders, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(count(db.pool(), "SELECT COUNT(*) FROM notifications").await, 0);
}

#[tokio::test]
async fn week_old_approval_escalates_to_creator() {
    let db = empty_seeded_with_idle_instance(Duration::days(8)).await;

    let report = context(&db)
        .run(MonitorJob::ApprovalEscalations, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.notified, 1);
    assert_eq!(recipients(db.pool(), "approval_escalation").await, vec![CREATOR]);
}

#[tokio::test]
async fn obligation_scan_notifies_due_and_overdue_once_per_day() {
    let db = seeded_db(1).await;
    let today = Utc::now().date_naive();
    insert_obligation(db.pool(), 1, CONTRACT, SECOND_APPROVER, today + Duration::days(3)).await;
    insert_obligation(db.pool(), 2, CONTRACT, SECOND_APPROVER, today - Duration::days(2)).await;
    insert_obligation(db.pool(), 3, CONTRACT, SECOND_APPROVER, today + Duration::days(30)).await;
    let monitor = context(&db);

    let report = monitor.run(MonitorJob::ObligationScan, Utc::now()).await.unwrap();
    assert_eq!(report.examined, 2);
    // Due notice to the owner, overdue notice to the owner and the creator.
    assert_eq!(report.notified, 3);
    assert_eq!(recipients(db.pool(), "obligation_due").await, vec![SECOND_APPROVER]);
    assert_eq!(
        recipients(db.pool(), "obligation_overdue").await,
        vec![SECOND_APPROVER, CREATOR]
    );

    let again = monitor.run(MonitorJob::ObligationScan, Utc::now()).await.unwrap();
    assert_eq!(again.examined, 0);
    assert_eq!(again.notified, 0);
}

#[tokio::test]
async fn delivery_retry_resends_failed_notifications() {
    let db = seeded_db(1).await;
    let address = format!("user{SECOND_APPROVER}@example.com");
    db.email.fail_for(&address);

    db.engine.decide(&approver(), approve()).await.unwrap();
    assert_eq!(
        count(db.pool(), "SELECT COUNT(*) FROM notifications WHERE delivery_status = 'failed'").await,
        1
    );

    db.email.recover(&address);
    let report = context(&db)
        .run(MonitorJob::DeliveryRetry, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(
        count(
            db.pool(),
            "SELECT COUNT(*) FROM notifications WHERE delivery_status = 'sent' AND delivery_attempts = 2"
        )
        .await,
        1
    );
    assert!(db.email.sent().iter().any(|m| m.to == address));
}

#[tokio::test]
async fn delivery_retry_skips_pending_rows_still_in_their_grace_period() {
    let db = seeded_db(1).await;
    let grace = Duration::seconds(MonitorConfig::default().pending_retry_grace_seconds);
    insert_pending_notification(db.pool(), FIRST_APPROVER, Utc::now()).await;
    insert_pending_notification(db.pool(), SECOND_APPROVER, Utc::now() - grace - Duration::minutes(1)).await;

    let report = context(&db)
        .run(MonitorJob::DeliveryRetry, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    let sent: Vec<String> = db.email.sent().into_iter().map(|m| m.to).collect();
    assert_eq!(sent, vec![format!("user{SECOND_APPROVER}@example.com")]);
    assert_eq!(
        count(db.pool(), "SELECT COUNT(*) FROM notifications WHERE delivery_status = 'pending'").await,
        1
    );
}

#[tokio::test]
async fn reminders_tolerate_contract_labels_from_other_flows() {
    let db = empty_seeded_with_idle_instance(Duration::hours(30)).await;
    sqlx::query("UPDATE contracts SET status = 'pending_approval', approval_status = 'awaiting_legal' WHERE id = ?1")
        .bind(CONTRACT)
        .execute(db.pool())
        .await
        .unwrap();

    let report = context(&db)
        .run(MonitorJob::ApprovalReminders, Utc::now())
        .await
        .unwrap();
    assert_eq!(report.notified, 1);
    assert_eq!(recipients(db.pool(), "approval_reminder").await, vec![FIRST_APPROVER]);
}

async fn insert_pending_notification(pool: &sqlx::SqlitePool, recipient_id: i64, created_at: chrono::DateTime<Utc>) {
    sqlx::query(
        "INSERT INTO notifications (recipient_id, contract_id, title, message, type, created_at) \
         VALUES (?1, ?2, 'Approval required', 'CT-100 is waiting', 'approval_request', ?3)",
    )
    .bind(recipient_id)
    .bind(CONTRACT)
    .bind(encode_timestamp(created_at))
    .execute(pool)
    .await
    .unwrap();
}

fn approve() -> clm_workflow::workflow::Decision {
    clm_workflow::workflow::Decision::parse(CONTRACT, "approve", "approval", None).unwrap()
}

/// The standard topology with the instance untouched for `idle`.
async fn empty_seeded_with_idle_instance(idle: Duration) -> TestDb {
    let db = empty_db().await;
    let pool = db.pool();
    insert_user(pool, CREATOR, COMPANY, "Carla Creator").await;
    insert_user(pool, FIRST_APPROVER, COMPANY, "Ada Approver").await;
    insert_user(pool, SECOND_APPROVER, COMPANY, "Ben Reviewer").await;
    insert_contract(pool, CONTRACT, COMPANY, "approval").await;
    insert_workflow(pool, MASTER_WORKFLOW, COMPANY, true).await;
    insert_step(pool, 201, MASTER_WORKFLOW, 1, "approval", FIRST_APPROVER).await;
    insert_step(pool, 202, MASTER_WORKFLOW, 2, "approval", SECOND_APPROVER).await;
    insert_instance(pool, INSTANCE, MASTER_WORKFLOW, CONTRACT, 1, "active", Utc::now() - idle).await;
    db
}
