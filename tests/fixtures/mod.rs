//! Shared SQLite fixtures for integration tests.
//!
//! Company 1 runs a two-step master approval workflow (plus an e-sign step)
//! on contract 100. User 20 belongs to company 2 but is also assigned to
//! step 2, so company scoping shows up in every test that advances.
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

use clm_workflow::config::{DatabaseConfig, NotificationConfig};
use clm_workflow::database::DatabaseManager;
use clm_workflow::notifications::{NotificationDispatcher, RecordingEmailSender};
use clm_workflow::observability::WorkflowMetrics;
use clm_workflow::store::{encode_timestamp, SqliteStore};
use clm_workflow::workflow::types::Actor;
use clm_workflow::workflow::WorkflowEngine;

pub const COMPANY: i64 = 1;
pub const OTHER_COMPANY: i64 = 2;
pub const CONTRACT: i64 = 100;
pub const INSTANCE: i64 = 500;
pub const MASTER_WORKFLOW: i64 = 1;
pub const CREATOR: i64 = 10;
pub const FIRST_APPROVER: i64 = 11;
pub const SECOND_APPROVER: i64 = 12;
pub const SIGNER: i64 = 13;
pub const OUTSIDER: i64 = 20;

pub struct TestDb {
    // Keeps the database file alive for the test's duration.
    pub dir: TempDir,
    pub database: DatabaseManager,
    pub store: Arc<SqliteStore>,
    pub email: Arc<RecordingEmailSender>,
    pub metrics: Arc<WorkflowMetrics>,
    pub dispatcher: Arc<NotificationDispatcher<SqliteStore>>,
    pub engine: Arc<WorkflowEngine<SqliteStore>>,
}

impl TestDb {
    pub fn pool(&self) -> &SqlitePool {
        self.database.pool()
    }

    pub fn notification_config() -> NotificationConfig {
        NotificationConfig {
            emails_per_second: 1000,
            ..NotificationConfig::default()
        }
    }
}

/// Migrated, empty database in a fresh temp directory.
pub async fn empty_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("clm.db").display()),
        ..DatabaseConfig::default()
    };
    let database = DatabaseManager::connect(&config).await.unwrap();

    let store = Arc::new(SqliteStore::new(database.pool().clone()));
    let email = Arc::new(RecordingEmailSender::new());
    let metrics = Arc::new(WorkflowMetrics::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        email.clone(),
        TestDb::notification_config(),
        metrics.clone(),
    ));
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        dispatcher.clone(),
        metrics.clone(),
    ));

    TestDb {
        dir,
        database,
        store,
        email,
        metrics,
        dispatcher,
        engine,
    }
}

/// The standard topology with the instance sitting at `current_step`.
pub async fn seeded_db(current_step: i64) -> TestDb {
    let db = empty_db().await;
    let pool = db.pool();

    insert_user(pool, CREATOR, COMPANY, "Carla Creator").await;
    insert_user(pool, FIRST_APPROVER, COMPANY, "Ada Approver").await;
    insert_user(pool, SECOND_APPROVER, COMPANY, "Ben Reviewer").await;
    insert_user(pool, SIGNER, COMPANY, "Sam Signer").await;
    insert_user(pool, OUTSIDER, OTHER_COMPANY, "Oscar Outsider").await;

    insert_contract(pool, CONTRACT, COMPANY, "approval").await;
    insert_workflow(pool, MASTER_WORKFLOW, COMPANY, true).await;
    insert_step(pool, 201, MASTER_WORKFLOW, 1, "approval", FIRST_APPROVER).await;
    insert_step(pool, 202, MASTER_WORKFLOW, 2, "approval", SECOND_APPROVER).await;
    insert_step(pool, 203, MASTER_WORKFLOW, 2, "approval", OUTSIDER).await;
    insert_step(pool, 204, MASTER_WORKFLOW, 3, "e_sign_authority", SIGNER).await;
    insert_instance(pool, INSTANCE, MASTER_WORKFLOW, CONTRACT, current_step, "active", Utc::now()).await;

    db
}

pub fn actor(id: i64, company_id: i64, name: &str) -> Actor {
    Actor {
        id,
        company_id,
        name: name.to_string(),
    }
}

pub fn approver() -> Actor {
    actor(FIRST_APPROVER, COMPANY, "Ada Approver")
}

pub fn second_approver() -> Actor {
    actor(SECOND_APPROVER, COMPANY, "Ben Reviewer")
}

pub async fn insert_user(pool: &SqlitePool, id: i64, company_id: i64, name: &str) {
    sqlx::query(
        "INSERT INTO users (id, company_id, name, email, role, department) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(id)
    .bind(company_id)
    .bind(name)
    .bind(format!("user{id}@example.com"))
    .bind("approver")
    .bind("Legal")
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_contract(pool: &SqlitePool, id: i64, company_id: i64, status: &str) {
    let now = encode_timestamp(Utc::now());
    sqlx::query(
        r#"
        INSERT INTO contracts (id, company_id, party_b_id, number, title, status, approval_status,
                               workflow_status, action_person_id, created_by, value, currency,
                               created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 'active', ?7, ?8, 125000.0, 'EUR', ?9, ?9)
        "#,
    )
    .bind(id)
    .bind(company_id)
    .bind(OTHER_COMPANY)
    .bind(format!("CT-{id}"))
    .bind("Master supply agreement")
    .bind(status)
    .bind(FIRST_APPROVER)
    .bind(CREATOR)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_workflow(pool: &SqlitePool, id: i64, company_id: i64, is_master: bool) {
    sqlx::query(
        "INSERT INTO workflows (id, company_id, name, is_active, is_master) VALUES (?1, ?2, ?3, 1, ?4)",
    )
    .bind(id)
    .bind(company_id)
    .bind(format!("Workflow {id}"))
    .bind(is_master)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_step(
    pool: &SqlitePool,
    id: i64,
    workflow_id: i64,
    step_number: i64,
    step_type: &str,
    assignee: i64,
) {
    sqlx::query(
        "INSERT INTO workflow_steps (id, workflow_id, step_number, step_type, assignee_user_id) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(id)
    .bind(workflow_id)
    .bind(step_number)
    .bind(step_type)
    .bind(assignee)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_instance(
    pool: &SqlitePool,
    id: i64,
    workflow_id: i64,
    contract_id: i64,
    current_step: i64,
    status: &str,
    updated_at: DateTime<Utc>,
) {
    sqlx::query(
        r#"
        INSERT INTO workflow_instances (id, workflow_id, contract_id, current_step, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(id)
    .bind(workflow_id)
    .bind(contract_id)
    .bind(current_step)
    .bind(status)
    .bind(encode_timestamp(updated_at - Duration::days(1)))
    .bind(encode_timestamp(updated_at))
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_obligation(
    pool: &SqlitePool,
    id: i64,
    contract_id: i64,
    owner_id: i64,
    due_date: chrono::NaiveDate,
) {
    sqlx::query(
        "INSERT INTO obligations (id, contract_id, owner_id, title, due_date) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(id)
    .bind(contract_id)
    .bind(owner_id)
    .bind(format!("Obligation {id}"))
    .bind(due_date.format("%Y-%m-%d").to_string())
    .execute(pool)
    .await
    .unwrap();
}

/// An audit row as another flow would write it, details stored verbatim.
pub async fn insert_audit_row(
    pool: &SqlitePool,
    user_id: i64,
    action_type: &str,
    details: &str,
    created_at: DateTime<Utc>,
) {
    sqlx::query(
        "INSERT INTO audit_logs (user_id, contract_id, action_type, action_details, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(user_id)
    .bind(CONTRACT)
    .bind(action_type)
    .bind(details)
    .bind(encode_timestamp(created_at))
    .execute(pool)
    .await
    .unwrap();
}

/// (current_step, status) of an instance.
pub async fn instance_state(pool: &SqlitePool, id: i64) -> (i64, String) {
    sqlx::query_as("SELECT current_step, status FROM workflow_instances WHERE id = ?1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// (status, approval_status, workflow_status) of a contract.
pub async fn contract_state(pool: &SqlitePool, id: i64) -> (String, Option<String>, Option<String>) {
    sqlx::query_as("SELECT status, approval_status, workflow_status FROM contracts WHERE id = ?1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

/// Recipients of notifications of `kind`, ordered by id.
pub async fn recipients(pool: &SqlitePool, kind: &str) -> Vec<i64> {
    sqlx::query_scalar("SELECT recipient_id FROM notifications WHERE type = ?1 ORDER BY id")
        .bind(kind)
        .fetch_all(pool)
        .await
        .unwrap()
}
