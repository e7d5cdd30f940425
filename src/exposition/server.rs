//! # Metrics Server
//!
//! This module defines the `MetricsServer`, an `axum`-based web server that
//! exposes the rendered [`Exposition`] to a Prometheus scraper on a single
//! configurable path.
//!
//! The server shuts down gracefully when the main application flips the
//! shutdown signal.

use super::Exposition;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

/// A server that exposes metrics to a Prometheus scraper.
pub struct MetricsServer {
    listener: TcpListener,
    metrics_path: String,
    exposition: Arc<Exposition>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    /// Creates a new `MetricsServer` but does not spawn it.
    ///
    /// # Arguments
    ///
    /// * `listener` - A `TcpListener` that has already been bound to an address.
    /// * `metrics_path` - The route metrics are served on; must start with `/`.
    /// * `exposition` - Renders the response body on each request.
    /// * `shutdown_rx` - A watch channel receiver for graceful shutdown.
    pub fn new(
        listener: TcpListener,
        metrics_path: String,
        exposition: Arc<Exposition>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            metrics_path,
            exposition,
            shutdown_rx,
        }
    }

    /// Returns a future that runs the server until a shutdown signal is received.
    pub fn run(self) -> impl Future<Output = ()> {
        let app = Router::new()
            .route(&self.metrics_path, get(render_metrics))
            .with_state(self.exposition);
        let mut shutdown_rx = self.shutdown_rx;
        let listener = self.listener;

        async move {
            let shutdown = async move {
                // A dropped sender also means shutdown.
                let _ = shutdown_rx.changed().await;
                trace!("Metrics server received shutdown signal.");
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Metrics server error: {}", e);
            }
            trace!("Metrics server task finished.");
        }
    }
}

async fn render_metrics(State(exposition): State<Arc<Exposition>>) -> Response {
    match exposition.render().await {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to render metrics: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response()
        }
    }
}
