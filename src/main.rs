// ABOUTME: CLI entry point for mysql-bigquery-replicator
// ABOUTME: Loads configuration, prepares both ends and runs the sync loop

use anyhow::Context;
use clap::Parser;
use mysql_bigquery_replicator::bigquery::BigQueryDestination;
use mysql_bigquery_replicator::config::{load_config_from_file, ReplicatorConfig};
use mysql_bigquery_replicator::deadletter::DeadLetterQueue;
use mysql_bigquery_replicator::logging::init_tracing;
use mysql_bigquery_replicator::mysql::MySqlSource;
use mysql_bigquery_replicator::sync::SyncDriver;
use mysql_bigquery_replicator::utils::format_duration;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mysql-bigquery-replicator")]
#[command(
    about = "Incrementally replicate MySQL/MariaDB tables into BigQuery",
    long_about = None
)]
struct Cli {
    /// TOML configuration file; environment variables are used when omitted
    #[arg(long, env = "REPLICATOR_CONFIG")]
    config: Option<PathBuf>,
    /// Run a single sync cycle and exit
    #[arg(long)]
    once: bool,
}

/// Resolves when Ctrl-C is received
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from_file(path)?,
        None => ReplicatorConfig::from_env().context("Failed to read configuration from environment")?,
    };

    init_tracing(config.logging.log_file.as_deref())?;
    config.validate().context("Invalid configuration")?;

    let settings = config.settings();
    tracing::info!(
        "Replicating {} table(s) into {}.{} every {}",
        config.tables.len(),
        config.destination.project_id,
        config.destination.dataset_id,
        format_duration(settings.poll_interval)
    );

    let source = MySqlSource::connect(&config.source)
        .await
        .context("Failed to connect to source database")?;
    let destination = BigQueryDestination::connect(&config.destination).await?;

    let mut driver = SyncDriver::setup(source, destination, config.tables.clone(), settings).await?;
    if let Some(path) = &config.sync.dead_letter_file {
        tracing::info!("Rejected rows will be recorded in {}", path.display());
        driver = driver.with_dead_letter(DeadLetterQueue::new(path));
    }

    if cli.once {
        let summary = driver.run_cycle().await;
        if !summary.is_clean() {
            tracing::warn!("Single cycle finished with errors");
        }
    } else {
        driver.run_forever(shutdown_signal()).await;
    }

    let (source, _) = driver.into_parts();
    source.close().await;

    tracing::info!("Replicator stopped");
    Ok(())
}
