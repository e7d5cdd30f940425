//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    exposition::{Exposition, MetricsServer, SystemCollector},
    gpu::GpuCollector,
    task_manager::TaskManager,
};
use anyhow::{Context, Result};
use prometheus::Registry;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Builds a registry holding one collector per enabled resource domain.
pub fn build_registry(config: &Config) -> Result<Registry> {
    let registry = Registry::new();

    if config.collectors.gpus_enabled {
        GpuCollector::new(config)
            .context("failed to set up the GPU collector")?
            .register(&registry)
            .context("failed to register the GPU collector")?;
        info!(
            fallback = config.collectors.fallback,
            "GPU metrics collection enabled"
        );
    } else {
        info!("No resource collectors enabled; only exporter metrics are served.");
    }

    Ok(registry)
}

/// A handle to the running exporter.
pub struct App {
    task_manager: TaskManager,
    metrics_addr: SocketAddr,
}

impl App {
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the metrics server actually bound to.
    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    /// Waits for the shutdown signal, then for every task to finish.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        let already_stopped = *shutdown_rx.borrow();
        if !already_stopped {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        let panicked = self.task_manager.shutdown().await;
        if panicked > 0 {
            anyhow::bail!("{panicked} tasks panicked during shutdown");
        }
        Ok(())
    }
}

/// Builder for the exporter.
///
/// The registry can be supplied directly, which is how tests run the server
/// against collectors backed by mock data.
pub struct AppBuilder {
    config: Config,
    registry_override: Option<Registry>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry_override: None,
        }
    }

    /// Serves this registry instead of the one built from the config.
    pub fn registry_override(mut self, registry: Registry) -> Self {
        self.registry_override = Some(registry);
        self
    }

    /// Binds the listener and spawns the server and the system collector.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        let registry = match self.registry_override {
            Some(registry) => registry,
            None => build_registry(&config)?,
        };

        let listen_address = config.listen_address()?;
        let listener = TcpListener::bind(listen_address)
            .await
            .with_context(|| format!("failed to bind metrics server to {listen_address}"))?;
        let metrics_addr = listener.local_addr()?;

        let system_collector = if config.system_metrics_enabled {
            Some(SystemCollector::new(&registry).context("failed to register process metrics")?)
        } else {
            None
        };

        let exposition = Arc::new(Exposition::new(registry, config.exclude_filter()?));
        let server = MetricsServer::new(
            listener,
            config.server.metrics_path.clone(),
            exposition,
            task_manager.get_shutdown_rx(),
        );
        task_manager.spawn("MetricsServer", server.run());

        if let Some(system_collector) = system_collector {
            let shutdown_rx = task_manager.get_shutdown_rx();
            task_manager.spawn("SystemCollector", system_collector.run(shutdown_rx));
        }

        info!(
            address = %metrics_addr,
            path = %config.server.metrics_path,
            "Metrics server listening"
        );

        Ok(App {
            task_manager,
            metrics_addr,
        })
    }
}
