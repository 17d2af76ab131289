//! Hands a fully uploaded task over to the catalog
//!
//! Nothing is committed unless every leg succeeded. The commit runs on the
//! worker pool like any leg and reports through the task event bus.

use crate::model::events::TaskEvent;
use crate::model::leg::CombinedResult;
use crate::model::package::ModelMetadata;
use crate::model::task_id::TaskId;
use crate::services::catalog::{CatalogApi, CommitRequest};
use crate::services::task_registry::UnitId;
use crate::services::worker_pool::WorkerPool;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

#[derive(Clone)]
pub struct FinalizationHandoff {
    catalog: Arc<dyn CatalogApi>,
    pool: WorkerPool,
    events: broadcast::Sender<TaskEvent>,
}

impl FinalizationHandoff {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        pool: WorkerPool,
        events: broadcast::Sender<TaskEvent>,
    ) -> Self {
        FinalizationHandoff {
            catalog,
            pool,
            events,
        }
    }

    /// Wait for the task's terminal outcome and commit it if it succeeded
    pub async fn attach(
        &self,
        task_id: TaskId,
        metadata: ModelMetadata,
        outcome: oneshot::Receiver<TaskEvent>,
    ) -> UnitId {
        let handoff = self.clone();
        // Waiting must not hold a pool slot the legs need.
        self.pool
            .spawn_unbounded(format!("{}/handoff", task_id), async move {
                match outcome.await {
                    Ok(TaskEvent::Uploaded { results, .. }) => {
                        let committer = handoff.clone();
                        handoff
                            .pool
                            .spawn(format!("{}/commit", task_id), async move {
                                committer.commit(task_id, &metadata, &results).await;
                            })
                            .await;
                    }
                    Ok(TaskEvent::Failed { .. }) => {
                        tracing::debug!("task {} failed, nothing to commit", task_id);
                    }
                    Ok(other) => {
                        tracing::warn!("task {}: unexpected outcome {:?}", task_id, other);
                    }
                    Err(_) => {
                        tracing::warn!("task {} ended without an outcome", task_id);
                    }
                }
            })
            .await
    }

    /// Send the combined result to the catalog and report how it went
    pub async fn commit(&self, task_id: TaskId, metadata: &ModelMetadata, results: &CombinedResult) {
        let outcome = match CommitRequest::from_results(metadata, results) {
            Ok(request) => self.catalog.commit_model(&request).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(model_id) => {
                tracing::info!("task {} committed as model {}", task_id, model_id);
                let _ = self.events.send(TaskEvent::Progress {
                    task_id,
                    percent: 100,
                    message: "Committed".to_string(),
                });
                let _ = self.events.send(TaskEvent::Committed { task_id, model_id });
            }
            Err(error) => {
                tracing::error!("task {} commit failed: {}", task_id, error);
                let _ = self.events.send(TaskEvent::CommitFailed { task_id, error });
            }
        }
    }
}
