//! Tracks the exporter's background tasks so shutdown can await them.
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Spawns named tasks and joins them all on shutdown.
///
/// Every task is expected to watch the receiver handed out by
/// [`TaskManager::get_shutdown_rx`] and return once it flips.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Number of tasks not yet joined.
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for every spawned task and returns how many of them panicked.
    pub async fn shutdown(self) -> usize {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        info!("Waiting for {} tasks to complete...", handles.len());

        let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let mut panicked = 0;
        for (task_name, result) in names.into_iter().zip(join_all(handles).await) {
            match result {
                Ok(()) => debug!(task_name, "Task shut down gracefully."),
                Err(e) => {
                    error!(task_name, error = %e, "Task panicked during shutdown.");
                    panicked += 1;
                }
            }
        }

        if panicked == 0 {
            info!("All tasks shut down gracefully.");
        }
        panicked
    }
}
