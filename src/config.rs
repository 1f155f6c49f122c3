use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the contract workflow service
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ClmConfig {
    /// HTTP API settings
    pub server: ServerConfig,
    /// Database settings
    pub database: DatabaseConfig,
    /// Notification persistence and email delivery
    pub notifications: NotificationConfig,
    /// Scheduled monitor settings
    pub monitor: MonitorConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    pub bind: SocketAddr,
    /// How long a resolved caller stays cached
    pub user_cache_ttl_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            user_cache_ttl_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection string
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
    /// How long a writer waits for the database lock
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://clm.db".to_string(),
            max_connections: 10,
            auto_migrate: true,
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Send emails for persisted notifications
    pub email_enabled: bool,
    /// Sender address on outgoing mail
    pub from_address: String,
    /// Outbound email rate
    pub emails_per_second: u32,
    /// Give up on a notification after this many failed deliveries
    pub max_delivery_attempts: i64,
    /// Base URL used for links in emails
    pub app_base_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            email_enabled: true,
            from_address: "no-reply@clm.local".to_string(),
            emails_per_second: 5,
            max_delivery_attempts: 5,
            app_base_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Run the monitor alongside the API
    pub enabled: bool,
    pub delivery_retry_interval_seconds: u64,
    pub approval_reminder_interval_seconds: u64,
    pub obligation_scan_interval_seconds: u64,
    pub escalation_interval_seconds: u64,
    /// Pending notifications younger than this belong to the dispatch that created them
    pub pending_retry_grace_seconds: i64,
    /// Remind assignees once an approval has been idle this long
    pub approval_reminder_after_hours: i64,
    /// Obligations due within this many days get a reminder
    pub obligation_lookahead_days: i64,
    /// Escalate approvals idle for this many days
    pub escalation_after_days: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delivery_retry_interval_seconds: 3600,
            approval_reminder_interval_seconds: 6 * 3600,
            obligation_scan_interval_seconds: 24 * 3600,
            escalation_interval_seconds: 7 * 24 * 3600,
            pending_retry_grace_seconds: 600,
            approval_reminder_after_hours: 24,
            obligation_lookahead_days: 7,
            escalation_after_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level, overridden by RUST_LOG
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable text
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl ClmConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (clm.toml, .clm-rc)
    /// 3. Environment variables (prefixed with CLM_, `__` between sections)
    pub fn load() -> Result<Self> {
        Self::load_from_dir(Path::new("."))
    }

    /// Same as [`ClmConfig::load`] with the configuration files looked up in `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&ClmConfig::default()).context("encoding defaults")?);

        let toml_file = dir.join("clm.toml");
        if toml_file.exists() {
            builder = builder.add_source(File::from(toml_file));
        }

        let rc_file = dir.join(".clm-rc");
        if rc_file.exists() {
            builder = builder.add_source(File::from(rc_file).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("CLM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("building configuration")?;
        config
            .try_deserialize()
            .context("configuration does not match the expected shape")
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
