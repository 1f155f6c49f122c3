use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;

/// Owns the connection pool and the schema migrations.
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open (creating if needed) the database, running migrations when
    /// `auto_migrate` is set.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("Invalid database url {}", config.url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout())
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", config.url))?;
        info!(url = %config.url, "Database connected");

        let manager = Self { pool };
        if config.auto_migrate {
            manager.migrate().await?;
        }
        Ok(manager)
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir, auto_migrate: bool) -> DatabaseConfig {
        DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("clm.db").display()),
            auto_migrate,
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn connect_creates_and_migrates() {
        let dir = TempDir::new().unwrap();
        let db = DatabaseManager::connect(&config_in(&dir, true)).await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(db.pool())
                .await
                .unwrap();
        for table in ["users", "contracts", "workflow_instances", "audit_logs", "notifications"] {
            assert!(tables.iter().any(|t| t == table), "missing table {table}");
        }
        db.close().await;
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db = DatabaseManager::connect(&config_in(&dir, false)).await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
        db.close().await;
    }
}
