//! Mirrors task events into the task store

use crate::model::events::TaskEvent;
use crate::model::task_status::TaskStatus;
use crate::services::task_store::TaskStore;
use color_eyre::eyre;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

pub struct PersistenceObserver {
    store: Arc<TaskStore>,
}

impl PersistenceObserver {
    pub fn new(store: Arc<TaskStore>) -> Self {
        PersistenceObserver { store }
    }

    /// Consume events until every sender is gone
    pub async fn run(self, mut events: broadcast::Receiver<TaskEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = self.apply(&event).await {
                        tracing::warn!("could not persist {:?}: {}", event, e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("persistence fell behind, {} task events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("persistence observer stopped");
    }

    pub async fn apply(&self, event: &TaskEvent) -> eyre::Result<()> {
        match event {
            TaskEvent::Progress {
                task_id,
                percent,
                message,
            } => self.store.record_progress(*task_id, *percent, message).await,
            TaskEvent::Uploaded { task_id, results } => {
                self.store.record_final_attributes(*task_id, results).await?;
                self.store.record_status(*task_id, TaskStatus::Uploaded).await
            }
            TaskEvent::Failed { task_id, failure } => {
                self.store
                    .record_status(*task_id, TaskStatus::Failed(failure.to_string()))
                    .await
            }
            TaskEvent::Committed { task_id, model_id } => {
                self.store.record_model_id(*task_id, model_id).await?;
                self.store.record_status(*task_id, TaskStatus::Finished).await
            }
            TaskEvent::CommitFailed { task_id, error } => {
                // Uploads are in place; the task stays uploaded and can be committed later.
                tracing::warn!("task {} stays uploaded: {}", task_id, error);
                Ok(())
            }
            TaskEvent::Finished { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::error::{CatalogError, LegError, LegFailure, S3Error};
    use crate::model::leg::{CombinedResult, LegId, LegPayload};
    use crate::model::package::{CategoryPath, ModelMetadata, ModelPackage};
    use crate::model::task_id::TaskId;
    use crate::model::task_record::TaskRecord;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (Arc<TaskStore>, PersistenceObserver, TaskId) {
        let store = Arc::new(TaskStore::new(dir.path().to_path_buf()).await.unwrap());
        let id = TaskId::new();
        let package = ModelPackage {
            model_path: PathBuf::from("/tmp/bed.blend"),
            image_paths: vec![],
            metadata: ModelMetadata {
                display_name: "Bed".into(),
                category_path: CategoryPath::new(["Furniture"]).unwrap(),
                blender_version: "4.2".into(),
                render_engine: "Cycles".into(),
            },
        };
        store.create_task(TaskRecord::pending(id, &package)).await.unwrap();
        (store.clone(), PersistenceObserver::new(store), id)
    }

    #[tokio::test]
    async fn test_successful_task_lifecycle() {
        let dir = TempDir::new().unwrap();
        let (store, observer, id) = setup(&dir).await;
        let mut results = CombinedResult::new();
        results.insert(LegId::object_store(), LegPayload::new("Furniture/bed.blend", vec![]));

        observer
            .apply(&TaskEvent::Progress {
                task_id: id,
                percent: 50,
                message: "Uploading model".into(),
            })
            .await
            .unwrap();
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Running);

        observer
            .apply(&TaskEvent::Uploaded {
                task_id: id,
                results: results.clone(),
            })
            .await
            .unwrap();
        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Uploaded);
        assert_eq!(record.results, Some(results));

        observer
            .apply(&TaskEvent::Committed {
                task_id: id,
                model_id: "5".into(),
            })
            .await
            .unwrap();
        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Finished);
        assert_eq!(record.model_id.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_failure_reason_is_kept_verbatim() {
        let dir = TempDir::new().unwrap();
        let (store, observer, id) = setup(&dir).await;
        let failure = LegFailure::new(id, LegId::object_store(), S3Error::NetworkError("reset".into()));

        observer
            .apply(&TaskEvent::Failed {
                task_id: id,
                failure: failure.clone(),
            })
            .await
            .unwrap();

        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed(failure.to_string()));
        assert_eq!(record.message, "s3 upload failed: Network error: reset");
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_task_uploaded() {
        let dir = TempDir::new().unwrap();
        let (store, observer, id) = setup(&dir).await;
        store.record_status(id, TaskStatus::Uploaded).await.unwrap();

        observer
            .apply(&TaskEvent::CommitFailed {
                task_id: id,
                error: CatalogError::Unreachable("refused".into()),
            })
            .await
            .unwrap();

        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_run_consumes_bus_until_closed() {
        let dir = TempDir::new().unwrap();
        let (store, observer, id) = setup(&dir).await;
        let (tx, rx) = broadcast::channel(16);
        let handle = tokio::spawn(observer.run(rx));

        tx.send(TaskEvent::Failed {
            task_id: id,
            failure: LegFailure::new(id, LegId::cloud_drive(), LegError::Crashed("gone".into())),
        })
        .unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(store.get(id).await.unwrap().status.is_terminal());
    }
}
