use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Row, SqlitePool, Transaction};
use tracing::warn;

use super::{StoreError, WorkflowStore};
use crate::workflow::status::{
    AuditAction, DeliveryStatus, InstanceStatus, Label, NotificationKind, ObligationStatus,
};
use crate::workflow::types::{
    ActionDetails, AuditRecord, CompanyId, Contract, ContractId, ContractStatusUpdate,
    ContractSummary, HistoryEntry, InstanceId, NewAuditRecord, NewNotification, Notification,
    Obligation, ObligationDue, StalledApproval, User, UserId, WorkflowId, WorkflowInstance,
    E_SIGN_AUTHORITY,
};

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp '{raw}': {e}")))
}

fn decode_date(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| StoreError::Corrupt(format!("invalid date '{raw}': {e}")))
}

const CONTRACT_BY_ID: &str = "SELECT id, company_id, party_b_id, number, title, status, \
     approval_status, workflow_status, action_person_id, created_by, value, currency, \
     created_at, updated_at FROM contracts WHERE id = ?1";

const USER_COLUMNS: &str = "u.id, u.company_id, u.name, u.email, u.role, u.department";

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, contract_id, title, message, type, read, \
     delivery_status, delivery_attempts, last_error, created_at";

const ACTIONABLE_STATUSES: &str = "('active', 'in_progress', 'pending')";

fn contract_from_row(row: &SqliteRow) -> Result<Contract, StoreError> {
    let approval_status: Option<String> = row.try_get("approval_status")?;
    let workflow_status: Option<String> = row.try_get("workflow_status")?;
    Ok(Contract {
        id: row.try_get("id")?,
        company_id: row.try_get("company_id")?,
        party_b_id: row.try_get("party_b_id")?,
        number: row.try_get("number")?,
        title: row.try_get("title")?,
        status: Label::decode(row.try_get("status")?),
        approval_status: approval_status.map(Label::decode),
        workflow_status: workflow_status.map(Label::decode),
        action_person_id: row.try_get("action_person_id")?,
        created_by: row.try_get("created_by")?,
        value: row.try_get("value")?,
        currency: row.try_get("currency")?,
        created_at: decode_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: decode_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        company_id: row.try_get("company_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: row.try_get("role")?,
        department: row.try_get("department")?,
    })
}

fn instance_from_row(row: &SqliteRow) -> Result<WorkflowInstance, StoreError> {
    Ok(WorkflowInstance {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        contract_id: row.try_get("contract_id")?,
        current_step: row.try_get("current_step")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        is_master: row.try_get("is_master")?,
        created_at: decode_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: decode_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification, StoreError> {
    Ok(Notification {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        contract_id: row.try_get("contract_id")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        kind: row.try_get::<String, _>("type")?.parse()?,
        read: row.try_get("read")?,
        delivery_status: row.try_get::<String, _>("delivery_status")?.parse()?,
        delivery_attempts: row.try_get("delivery_attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: decode_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn audit_record_from_row(row: &SqliteRow) -> Result<AuditRecord, StoreError> {
    let id: i64 = row.try_get("id")?;
    let raw: String = row.try_get("action_details")?;
    let details = serde_json::from_str::<ActionDetails>(&raw).unwrap_or_else(|err| {
        warn!(audit_id = id, error = %err, "Unreadable action details; showing record without them");
        ActionDetails::default()
    });
    Ok(AuditRecord {
        id,
        user_id: row.try_get("user_id")?,
        contract_id: row.try_get("contract_id")?,
        action_type: row.try_get::<String, _>("action_type")?.parse()?,
        details,
        created_at: decode_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

/// SQLite-backed store.
///
/// A snapshot is a plain sqlx transaction. SQLite has no `SELECT ... FOR
/// UPDATE`, so [`WorkflowStore::lock_active_instance`] opens the write
/// transaction by touching the contract's instance rows before reading them;
/// a second decision on the same database then waits on the busy timeout
/// until the first one ends.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_contract<'e, E>(
        executor: E,
        contract_id: ContractId,
    ) -> Result<Option<Contract>, StoreError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(CONTRACT_BY_ID)
            .bind(contract_id)
            .fetch_optional(executor)
            .await?
            .as_ref()
            .map(contract_from_row)
            .transpose()
    }

    async fn fetch_users<'e, E>(
        executor: E,
        sql: &'e str,
        binds: &[i64],
    ) -> Result<Vec<User>, StoreError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(*value);
        }
        query
            .fetch_all(executor)
            .await?
            .iter()
            .map(user_from_row)
            .collect()
    }
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    type Snapshot = Transaction<'static, Sqlite>;

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StoreError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StoreError> {
        snapshot.commit().await?;
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StoreError> {
        snapshot.rollback().await?;
        Ok(())
    }

    async fn lock_active_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        contract_id: ContractId,
        company_id: CompanyId,
    ) -> Result<Option<WorkflowInstance>, StoreError> {
        // A write first, so the transaction holds the database write lock
        // before it reads current_step.
        sqlx::query("UPDATE workflow_instances SET updated_at = updated_at WHERE contract_id = ?1")
            .bind(contract_id)
            .execute(&mut **snapshot)
            .await?;

        let sql = format!(
            r#"
            SELECT wi.id, wi.workflow_id, wi.contract_id, wi.current_step, wi.status,
                   wi.created_at, wi.updated_at, w.is_master
            FROM workflow_instances wi
            JOIN workflows w ON w.id = wi.workflow_id
            WHERE wi.contract_id = ?1
              AND w.company_id = ?2
              AND w.is_active = 1
              AND wi.status IN {ACTIONABLE_STATUSES}
            ORDER BY w.is_master DESC, w.id DESC
            LIMIT 1
            "#
        );
        sqlx::query(&sql)
            .bind(contract_id)
            .bind(company_id)
            .fetch_optional(&mut **snapshot)
            .await?
            .as_ref()
            .map(instance_from_row)
            .transpose()
    }

    async fn count_approval_steps(
        &self,
        snapshot: &mut Self::Snapshot,
        workflow_id: WorkflowId,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT step_number) AS total
            FROM workflow_steps
            WHERE workflow_id = ?1 AND step_type <> ?2
            "#,
        )
        .bind(workflow_id)
        .bind(E_SIGN_AUTHORITY)
        .fetch_one(&mut **snapshot)
        .await?;
        Ok(row.try_get("total")?)
    }

    async fn step_assignees(
        &self,
        snapshot: &mut Self::Snapshot,
        workflow_id: WorkflowId,
        step_number: i64,
        company_id: CompanyId,
    ) -> Result<Vec<User>, StoreError> {
        let sql = format!(
            r#"
            SELECT DISTINCT {USER_COLUMNS}
            FROM workflow_steps s
            JOIN users u ON u.id = s.assignee_user_id
            WHERE s.workflow_id = ?1
              AND s.step_number = ?2
              AND s.step_type <> '{E_SIGN_AUTHORITY}'
              AND u.company_id = ?3
            ORDER BY u.id
            "#
        );
        Self::fetch_users(&mut **snapshot, &sql, &[workflow_id, step_number, company_id]).await
    }

    async fn contract_in_snapshot(
        &self,
        snapshot: &mut Self::Snapshot,
        contract_id: ContractId,
    ) -> Result<Option<Contract>, StoreError> {
        Self::fetch_contract(&mut **snapshot, contract_id).await
    }

    async fn update_contract_status(
        &self,
        snapshot: &mut Self::Snapshot,
        contract_id: ContractId,
        update: &ContractStatusUpdate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE contracts
            SET status = COALESCE(?1, status),
                approval_status = COALESCE(?2, approval_status),
                workflow_status = COALESCE(?3, workflow_status),
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.approval_status.map(|s| s.as_str()))
        .bind(update.workflow_status.map(|s| s.as_str()))
        .bind(encode_timestamp(Utc::now()))
        .bind(contract_id)
        .execute(&mut **snapshot)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "contract",
                id: contract_id,
            });
        }
        Ok(())
    }

    async fn update_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        instance_id: InstanceId,
        expected_step: i64,
        new_step: i64,
        new_status: InstanceStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET current_step = ?1, status = ?2, updated_at = ?3
            WHERE id = ?4 AND current_step = ?5 AND status <> 'completed'
            "#,
        )
        .bind(new_step)
        .bind(new_status.as_str())
        .bind(encode_timestamp(Utc::now()))
        .bind(instance_id)
        .bind(expected_step)
        .execute(&mut **snapshot)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ConcurrentConflict {
                instance_id,
                expected_step,
            });
        }
        Ok(())
    }

    async fn insert_audit_record(
        &self,
        snapshot: &mut Self::Snapshot,
        record: NewAuditRecord,
    ) -> Result<i64, StoreError> {
        let details = serde_json::to_string(&record.details)?;
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, contract_id, action_type, action_details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(record.user_id)
        .bind(record.contract_id)
        .bind(record.action_type.as_str())
        .bind(details)
        .bind(encode_timestamp(Utc::now()))
        .execute(&mut **snapshot)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn stalled_approvals(
        &self,
        snapshot: &mut Self::Snapshot,
        idle_since: DateTime<Utc>,
    ) -> Result<Vec<StalledApproval>, StoreError> {
        let sql = format!(
            r#"
            SELECT wi.id, wi.workflow_id, wi.contract_id, wi.current_step, wi.status,
                   wi.created_at, wi.updated_at, w.is_master
            FROM workflow_instances wi
            JOIN workflows w ON w.id = wi.workflow_id
            JOIN contracts c ON c.id = wi.contract_id
            WHERE w.is_active = 1
              AND w.company_id = c.company_id
              AND wi.status IN {ACTIONABLE_STATUSES}
              AND wi.updated_at < ?1
            ORDER BY wi.id
            "#
        );
        let instances = sqlx::query(&sql)
            .bind(encode_timestamp(idle_since))
            .fetch_all(&mut **snapshot)
            .await?
            .iter()
            .map(instance_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut stalled = Vec::with_capacity(instances.len());
        for instance in instances {
            if let Some(contract) = Self::fetch_contract(&mut **snapshot, instance.contract_id).await? {
                stalled.push(StalledApproval { instance, contract });
            }
        }
        Ok(stalled)
    }

    async fn obligations_due(
        &self,
        snapshot: &mut Self::Snapshot,
        due_by: NaiveDate,
        reminded_before: DateTime<Utc>,
    ) -> Result<Vec<ObligationDue>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.contract_id, o.owner_id, o.title, o.due_date, o.status,
                   o.last_reminded_at,
                   c.number AS contract_number, c.title AS contract_title,
                   c.created_by AS contract_creator
            FROM obligations o
            JOIN contracts c ON c.id = o.contract_id
            WHERE o.status = ?1
              AND o.due_date <= ?2
              AND (o.last_reminded_at IS NULL OR o.last_reminded_at < ?3)
            ORDER BY o.due_date, o.id
            "#,
        )
        .bind(ObligationStatus::Open.as_str())
        .bind(due_by.format("%Y-%m-%d").to_string())
        .bind(encode_timestamp(reminded_before))
        .fetch_all(&mut **snapshot)
        .await?;

        rows.iter()
            .map(|row| -> Result<ObligationDue, StoreError> {
                let last_reminded_at: Option<String> = row.try_get("last_reminded_at")?;
                let obligation = Obligation {
                    id: row.try_get("id")?,
                    contract_id: row.try_get("contract_id")?,
                    owner_id: row.try_get("owner_id")?,
                    title: row.try_get("title")?,
                    due_date: decode_date(&row.try_get::<String, _>("due_date")?)?,
                    status: row.try_get::<String, _>("status")?.parse()?,
                    last_reminded_at: last_reminded_at.as_deref().map(decode_timestamp).transpose()?,
                };
                Ok(ObligationDue {
                    contract: ContractSummary {
                        id: obligation.contract_id,
                        number: row.try_get("contract_number")?,
                        title: row.try_get("contract_title")?,
                    },
                    contract_creator: row.try_get("contract_creator")?,
                    obligation,
                })
            })
            .collect()
    }

    async fn mark_obligation_reminded(
        &self,
        snapshot: &mut Self::Snapshot,
        obligation_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE obligations SET last_reminded_at = ?1 WHERE id = ?2")
            .bind(encode_timestamp(at))
            .bind(obligation_id)
            .execute(&mut **snapshot)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "obligation",
                id: obligation_id,
            });
        }
        Ok(())
    }

    async fn get_contract(&self, contract_id: ContractId) -> Result<Option<Contract>, StoreError> {
        Self::fetch_contract(&self.pool, contract_id).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
        Ok(Self::fetch_users(&self.pool, &sql, &[user_id]).await?.into_iter().next())
    }

    async fn list_history(&self, contract_id: ContractId) -> Result<Vec<HistoryEntry>, StoreError> {
        let placeholders = AuditAction::HISTORY
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            SELECT a.id, a.user_id, a.contract_id, a.action_type, a.action_details, a.created_at,
                   u.id AS actor_id, u.company_id AS actor_company_id, u.name AS actor_name,
                   u.email AS actor_email, u.role AS actor_role, u.department AS actor_department
            FROM audit_logs a
            LEFT JOIN users u ON u.id = a.user_id
            WHERE a.contract_id = ?1 AND a.action_type IN ({placeholders})
            ORDER BY a.created_at DESC, a.id DESC
            "#
        );

        let mut query = sqlx::query(&sql).bind(contract_id);
        for action in AuditAction::HISTORY {
            query = query.bind(action.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<HistoryEntry, StoreError> {
                let actor_id: Option<i64> = row.try_get("actor_id")?;
                let actor = match actor_id {
                    Some(id) => Some(User {
                        id,
                        company_id: row.try_get("actor_company_id")?,
                        name: row.try_get("actor_name")?,
                        email: row.try_get("actor_email")?,
                        role: row.try_get("actor_role")?,
                        department: row.try_get("actor_department")?,
                    }),
                    None => None,
                };
                Ok(HistoryEntry {
                    record: audit_record_from_row(row)?,
                    actor,
                })
            })
            .collect()
    }

    async fn master_workflow_participants(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<User>, StoreError> {
        let sql = format!(
            r#"
            SELECT DISTINCT {USER_COLUMNS}
            FROM workflow_steps s
            JOIN workflows w ON w.id = s.workflow_id
            JOIN users u ON u.id = s.assignee_user_id
            WHERE w.company_id = ?1
              AND w.is_master = 1
              AND w.is_active = 1
              AND u.company_id = ?1
            ORDER BY u.id
            "#
        );
        Self::fetch_users(&self.pool, &sql, &[company_id]).await
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO notifications
                (recipient_id, contract_id, title, message, type, read,
                 delivery_status, delivery_attempts, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, 0, ?7)
            "#,
        )
        .bind(notification.recipient_id)
        .bind(notification.contract_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .bind(DeliveryStatus::Pending.as_str())
        .bind(encode_timestamp(created_at))
        .execute(&self.pool)
        .await?;

        Ok(Notification {
            id: result.last_insert_rowid(),
            recipient_id: notification.recipient_id,
            contract_id: notification.contract_id,
            title: notification.title,
            message: notification.message,
            kind: notification.kind,
            read: false,
            delivery_status: DeliveryStatus::Pending,
            delivery_attempts: 0,
            last_error: None,
            created_at,
        })
    }

    async fn record_delivery(
        &self,
        notification_id: i64,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let attempted = i64::from(matches!(status, DeliveryStatus::Sent | DeliveryStatus::Failed));
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET delivery_status = ?1,
                delivery_attempts = delivery_attempts + ?2,
                last_error = ?3
            WHERE id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(attempted)
        .bind(error)
        .bind(notification_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "notification",
                id: notification_id,
            });
        }
        Ok(())
    }

    async fn undelivered_notifications(
        &self,
        max_attempts: i64,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let sql = format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM notifications
            WHERE (delivery_status = ?1 OR (delivery_status = ?2 AND created_at < ?3))
              AND delivery_attempts < ?4
            ORDER BY id
            LIMIT ?5
            "#
        );
        sqlx::query(&sql)
            .bind(DeliveryStatus::Failed.as_str())
            .bind(DeliveryStatus::Pending.as_str())
            .bind(encode_timestamp(pending_before))
            .bind(max_attempts)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(notification_from_row)
            .collect()
    }

    async fn notification_sent_since(
        &self,
        recipient_id: UserId,
        contract_id: Option<ContractId>,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM notifications
                WHERE recipient_id = ?1
                  AND contract_id IS ?2
                  AND type = ?3
                  AND created_at >= ?4
            ) AS found
            "#,
        )
        .bind(recipient_id)
        .bind(contract_id)
        .bind(kind.as_str())
        .bind(encode_timestamp(since))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("found")? != 0)
    }
}
