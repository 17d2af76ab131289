//! Entry point for submitting model packages
//!
//! A submitted package becomes one task with an object store leg and a cloud
//! drive leg. The task's events are broadcast on a single bus that the
//! persistence observer, the finalization handoff and any UI share.

use crate::model::error::SubmitError;
use crate::model::events::TaskEvent;
use crate::model::package::ModelPackage;
use crate::model::task_id::TaskId;
use crate::model::task_record::TaskRecord;
use crate::services::catalog::CatalogApi;
use crate::services::cloud_drive::CloudDrive;
use crate::services::finalization::FinalizationHandoff;
use crate::services::legs::{DriveLeg, S3Leg};
use crate::services::object_store::ObjectStore;
use crate::services::persistence_observer::PersistenceObserver;
use crate::services::task_store::TaskStore;
use crate::services::upload_waiter::UploadWaiter;
use crate::services::worker_pool::WorkerPool;
use crate::settings::app_settings::WorkerSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Capacity of the task event bus; slow subscribers lag past this
pub const EVENT_BUS_CAPACITY: usize = 1024;

const OBSERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The remote services a task talks to
#[derive(Clone)]
pub struct UploadBackends {
    pub object_store: Arc<dyn ObjectStore>,
    pub cloud_drive: Arc<dyn CloudDrive>,
    pub catalog: Arc<dyn CatalogApi>,
}

pub struct UploadCoordinator {
    pool: WorkerPool,
    events: broadcast::Sender<TaskEvent>,
    store: Arc<TaskStore>,
    backends: UploadBackends,
    handoff: FinalizationHandoff,
    cancel_siblings_on_failure: bool,
    observer: JoinHandle<()>,
}

impl UploadCoordinator {
    /// Must be called from within a tokio runtime
    pub fn new(store: Arc<TaskStore>, backends: UploadBackends, settings: &WorkerSettings) -> Self {
        let pool = WorkerPool::new(settings.max_concurrent_legs);
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let observer = tokio::spawn(PersistenceObserver::new(store.clone()).run(events.subscribe()));
        let handoff = FinalizationHandoff::new(backends.catalog.clone(), pool.clone(), events.clone());
        UploadCoordinator {
            pool,
            events,
            store,
            backends,
            handoff,
            cancel_siblings_on_failure: settings.cancel_siblings_on_failure,
            observer,
        }
    }

    /// Persist a new task for `package` and start uploading it
    ///
    /// Returns as soon as the legs are queued; progress and the outcome arrive
    /// on the event bus.
    pub async fn submit(&self, package: ModelPackage) -> Result<TaskId, SubmitError> {
        if let Some(missing) = package.files().find(|path| !path.is_file()) {
            return Err(SubmitError::MissingFile(missing.to_path_buf()));
        }

        let task_id = TaskId::new();
        self.store
            .create_task(TaskRecord::pending(task_id, &package))
            .await
            .map_err(SubmitError::Persistence)?;

        let package = Arc::new(package);
        let mut waiter = UploadWaiter::new(task_id, self.events.clone())
            .cancel_siblings_on_failure(self.cancel_siblings_on_failure);
        waiter.register(Box::new(S3Leg::new(
            task_id,
            package.clone(),
            self.backends.object_store.clone(),
        )));
        waiter.register(Box::new(DriveLeg::new(
            task_id,
            package.clone(),
            self.backends.cloud_drive.clone(),
        )));

        let outcome = waiter.terminal_outcome();
        self.handoff
            .attach(task_id, package.metadata.clone(), outcome)
            .await;
        let handle = waiter.start(&self.pool).await;

        tracing::info!(
            "task {} submitted: {} with {} images on {} legs",
            task_id,
            package.metadata.display_name,
            package.image_paths.len(),
            handle.leg_units.len()
        );
        Ok(task_id)
    }

    /// Subscribe to every task's events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Abort whatever still runs and let the observer persist what it already got
    pub async fn shutdown(self) {
        let UploadCoordinator {
            pool,
            events,
            handoff,
            observer,
            ..
        } = self;
        pool.shutdown().await;
        drop(handoff);
        drop(events);
        if tokio::time::timeout(OBSERVER_DRAIN_TIMEOUT, observer).await.is_err() {
            tracing::warn!("persistence observer did not drain in time");
        }
    }
}
