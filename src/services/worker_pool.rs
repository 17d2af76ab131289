//! Bounded pool of concurrent execution units shared by all in-flight tasks
//!
//! Legs and catalog commits take a permit before they run. Aggregator loops are
//! spawned outside the bound so a full pool can never starve the bookkeeping
//! that would free it again.

use crate::services::task_registry::{TaskRegistry, UnitId};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default number of legs/commits allowed to run at once
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Raised once the pool starts aborting its units
///
/// Units that observe it while being torn down must not report the abort as a failure.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    registry: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
    shutdown: ShutdownSignal,
}

impl WorkerPool {
    /// Create a pool that runs at most `concurrency` bounded units at a time
    pub fn new(concurrency: usize) -> Self {
        WorkerPool {
            registry: Arc::new(TaskRegistry::new()),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            shutdown: ShutdownSignal::default(),
        }
    }

    /// Run `future` once a pool slot is free
    pub async fn spawn<F>(&self, name: impl Into<String>, future: F) -> UnitId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let permits = self.permits.clone();
        let unit_name = name.clone();
        self.registry
            .spawn_tracked(name, async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    tracing::warn!("worker pool closed, dropping unit {}", unit_name);
                    return;
                };
                future.await;
            })
            .await
    }

    /// Run `future` on its own unit, outside the concurrency bound
    pub async fn spawn_unbounded<F>(&self, name: impl Into<String>, future: F) -> UnitId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.registry.spawn_tracked(name, future).await
    }

    pub async fn cancel(&self, unit_id: UnitId) -> bool {
        self.registry.cancel(unit_id).await
    }

    pub async fn is_active(&self, unit_id: UnitId) -> bool {
        self.registry.is_active(unit_id).await
    }

    pub async fn active_count(&self) -> usize {
        self.registry.active_count().await
    }

    /// Number of bounded units that could start right now
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_raised()
    }

    /// Abort every unit, bounded or not
    ///
    /// The shutdown signal is raised before the first abort.
    pub async fn shutdown(&self) {
        self.shutdown.raise();
        let active = self.registry.get_active_units().await;
        if !active.is_empty() {
            tracing::info!("aborting {} running units", active.len());
        }
        self.registry.cancel_all().await;
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}
