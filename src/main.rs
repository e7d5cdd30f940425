//! slurm-exporter - Prometheus exporter for Slurm cluster resources.

use anyhow::Result;
use clap::Parser;
use slurm_exporter::{app::App, cli::Cli, config::Config};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        tracing_subscriber::fmt().init();
        error!("Failed to load configuration: {:#}", err);
        std::process::exit(1);
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("slurm-exporter starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Poll Limit: {}s", config.poll_limit);
    info!("Listen Address: {}", config.server.listen_address);
    info!("Metrics Path: {}", config.server.metrics_path);
    info!(
        "Exclude Filter: {}",
        config.server.exclude_filter.as_deref().unwrap_or("None")
    );
    info!("GPU Collector: {}", enabled(config.collectors.gpus_enabled));
    info!("Fallback Mode: {}", enabled(config.collectors.fallback));
    let fallback = config.collectors.fallback;
    info!("sinfo GPU Command: {}", config.commands.sinfo_gpu_args(fallback).join(" "));
    info!("sacct GPU Command: {}", config.commands.sacct_gpu_args(fallback).join(" "));
    info!("Command Timeout: {}s", config.commands.timeout_seconds);
    info!("System Metrics: {}", enabled(config.system_metrics_enabled));
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;
    let app_task = tokio::spawn(app.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Shutting down gracefully...");
    if shutdown_tx.send(true).is_err() {
        error!("All tasks already stopped before shutdown.");
    }

    match app_task.await {
        Ok(result) => result?,
        Err(e) => error!("Application task panicked: {:?}", e),
    }

    info!("All tasks shut down. Exiting.");
    Ok(())
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "Enabled"
    } else {
        "Disabled"
    }
}
