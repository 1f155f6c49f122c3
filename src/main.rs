use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use clm_workflow::config::ClmConfig;
use clm_workflow::database::DatabaseManager;
use clm_workflow::monitor::MonitorJob;
use clm_workflow::notifications::LogEmailSender;
use clm_workflow::shutdown::ShutdownCoordinator;
use clm_workflow::telemetry::init_telemetry;
use clm_workflow::Services;

#[derive(Parser)]
#[command(name = "clm")]
#[command(about = "Contract approval workflow service")]
#[command(long_about = "Runs the contract approval workflow API and the background monitor that \
                       chases stalled approvals, due obligations and undelivered notifications.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and run the scheduled monitor (default)
    Serve {
        /// Do not start the scheduled monitor
        #[arg(long, help = "Serve the API without the background monitor")]
        no_monitor: bool,
    },
    /// Apply pending database migrations and exit
    Migrate,
    /// Run monitor jobs
    Monitor {
        /// Run a single job once and exit
        #[arg(long, value_enum, help = "Job to run once")]
        once: MonitorJob,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    ClmConfig::load_env_file()?;
    let config = ClmConfig::load().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Serve { no_monitor: false }) {
        Commands::Serve { no_monitor } => {
            tokio::runtime::Runtime::new()?.block_on(async { serve_command(config, no_monitor).await })
        }
        Commands::Migrate => {
            tokio::runtime::Runtime::new()?.block_on(async { migrate_command(config).await })
        }
        Commands::Monitor { once } => {
            tokio::runtime::Runtime::new()?.block_on(async { monitor_command(config, once).await })
        }
        Commands::Config => config_command(&config),
    }
}

async fn serve_command(mut config: ClmConfig, no_monitor: bool) -> Result<()> {
    init_telemetry(&config.observability)?;
    if no_monitor {
        config.monitor.enabled = false;
    }

    let email = Arc::new(LogEmailSender::new(config.notifications.from_address.clone()));
    let services = Services::build(config, email).await?;

    let shutdown = ShutdownCoordinator::new();
    shutdown.install_signal_handlers();
    services.serve(&shutdown).await
}

async fn migrate_command(mut config: ClmConfig) -> Result<()> {
    init_telemetry(&config.observability)?;
    config.database.auto_migrate = false;
    let database = DatabaseManager::connect(&config.database).await?;
    database.migrate().await?;
    database.close().await;
    println!("✅ Database migrations applied to {}", config.database.url);
    Ok(())
}

async fn monitor_command(config: ClmConfig, job: MonitorJob) -> Result<()> {
    init_telemetry(&config.observability)?;
    let email = Arc::new(LogEmailSender::new(config.notifications.from_address.clone()));
    let services = Services::build(config, email).await?;

    let result = services.monitor().run_once(job).await;
    services.metrics.log_stats();
    services.database.close().await;

    let report = result.with_context(|| format!("Monitor job {job} failed"))?;
    println!(
        "✅ {}: examined {}, notified {}",
        report.job, report.examined, report.notified
    );
    Ok(())
}

fn config_command(config: &ClmConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
