//! Persistent record of every upload task
//!
//! Records live in `tasks.json` in the data directory and are cached in memory.
//! Every mutation rewrites the file, so a crash loses at most the write in flight.

use crate::model::leg::CombinedResult;
use crate::model::task_id::TaskId;
use crate::model::task_record::TaskRecord;
use crate::model::task_status::TaskStatus;
use color_eyre::eyre::{self, Report};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

pub const TASKS_FILE: &str = "tasks.json";

/// On-disk layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedTasks {
    tasks: Vec<TaskRecord>,
}

pub struct TaskStore {
    state_file: PathBuf,
    tasks: RwLock<BTreeMap<TaskId, TaskRecord>>,
    /// Serializes file writes so the temp file is never shared
    write_lock: Mutex<()>,
}

impl TaskStore {
    /// Open the store in `data_dir`, starting empty if there is no readable state
    ///
    /// Tasks that were still running when the state was written are marked interrupted.
    pub async fn new(data_dir: PathBuf) -> eyre::Result<Self> {
        let state_file = data_dir.join(TASKS_FILE);

        let persisted = if state_file.exists() {
            match Self::load_from_file(&state_file).await {
                Ok(persisted) => {
                    tracing::info!("Loaded {} tasks", persisted.tasks.len());
                    persisted
                }
                Err(e) => {
                    tracing::warn!("Failed to load task state, starting fresh: {}", e);
                    PersistedTasks::default()
                }
            }
        } else {
            PersistedTasks::default()
        };

        let mut tasks = BTreeMap::new();
        for mut record in persisted.tasks {
            if record.status.is_active() {
                tracing::info!("task {} was interrupted ({})", record.id, record.status);
                record.status = TaskStatus::Interrupted;
                record.message = "Interrupted".to_string();
            }
            tasks.insert(record.id, record);
        }

        Ok(TaskStore {
            state_file,
            tasks: RwLock::new(tasks),
            write_lock: Mutex::new(()),
        })
    }

    async fn load_from_file(path: &Path) -> eyre::Result<PersistedTasks> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save_to_file(&self) -> eyre::Result<()> {
        let _guard = self.write_lock.lock().await;
        let persisted = {
            let tasks = self.tasks.read().await;
            PersistedTasks {
                tasks: tasks.values().cloned().collect(),
            }
        };
        let content = serde_json::to_string_pretty(&persisted)?;

        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Write next to the target and rename so readers never see half a file
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.state_file).await?;
        Ok(())
    }

    /// Apply `update` to one record and persist if it reports a change
    async fn update<F>(&self, task_id: TaskId, update: F) -> eyre::Result<()>
    where
        F: FnOnce(&mut TaskRecord) -> bool,
    {
        let changed = {
            let mut tasks = self.tasks.write().await;
            let record = tasks
                .get_mut(&task_id)
                .ok_or_else(|| Report::msg(format!("Task not found: {}", task_id)))?;
            update(record)
        };
        if changed {
            self.save_to_file().await?;
        }
        Ok(())
    }

    pub async fn create_task(&self, record: TaskRecord) -> eyre::Result<()> {
        let changed = {
            let mut tasks = self.tasks.write().await;
            match tasks.get(&record.id) {
                Some(existing) if *existing == record => false,
                Some(_) => {
                    return Err(Report::msg(format!("Task already exists: {}", record.id)));
                }
                None => {
                    tasks.insert(record.id, record);
                    true
                }
            }
        };
        if changed {
            self.save_to_file().await?;
        }
        Ok(())
    }

    /// Store combined progress; the first report moves a pending task to running
    pub async fn record_progress(
        &self,
        task_id: TaskId,
        percent: u8,
        message: &str,
    ) -> eyre::Result<()> {
        self.update(task_id, |record| {
            if record.status.is_terminal() {
                return false;
            }
            let mut changed = false;
            if record.status == TaskStatus::Pending {
                record.status = TaskStatus::Running;
                changed = true;
            }
            if record.progress != percent || record.message != message {
                record.progress = percent.min(100);
                record.message = message.to_string();
                changed = true;
            }
            changed
        })
        .await
    }

    /// Move a task to `status`; terminal states are never left again
    pub async fn record_status(&self, task_id: TaskId, status: TaskStatus) -> eyre::Result<()> {
        self.update(task_id, |record| {
            if record.status == status {
                return false;
            }
            if record.status.is_terminal() {
                tracing::warn!(
                    "task {} is {}, ignoring change to {}",
                    task_id,
                    record.status,
                    status
                );
                return false;
            }
            if let Some(reason) = status.error() {
                record.message = reason.to_string();
            }
            record.status = status;
            true
        })
        .await
    }

    /// Keep the backend references of a task whose legs all succeeded
    pub async fn record_final_attributes(
        &self,
        task_id: TaskId,
        results: &CombinedResult,
    ) -> eyre::Result<()> {
        self.update(task_id, |record| {
            if record.results.as_ref() == Some(results) {
                return false;
            }
            record.results = Some(results.clone());
            true
        })
        .await
    }

    pub async fn record_model_id(&self, task_id: TaskId, model_id: &str) -> eyre::Result<()> {
        self.update(task_id, |record| {
            if record.model_id.as_deref() == Some(model_id) {
                return false;
            }
            record.model_id = Some(model_id.to_string());
            true
        })
        .await
    }

    /// Every known task, oldest first
    pub async fn list_tasks(&self) -> Vec<TaskRecord> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn get(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.tasks.read().await.get(&task_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::leg::{LegId, LegPayload};
    use crate::model::package::{CategoryPath, ModelMetadata, ModelPackage};
    use tempfile::TempDir;

    fn package() -> ModelPackage {
        ModelPackage {
            model_path: PathBuf::from("/models/sofa.blend"),
            image_paths: vec![PathBuf::from("/models/sofa.png")],
            metadata: ModelMetadata {
                display_name: "Sofa".into(),
                category_path: CategoryPath::new(["Furniture", "Sofas"]).unwrap(),
                blender_version: "4.0".into(),
                render_engine: "Cycles".into(),
            },
        }
    }

    async fn store_with_task(dir: &TempDir) -> (TaskStore, TaskId) {
        let store = TaskStore::new(dir.path().to_path_buf()).await.unwrap();
        let id = TaskId::new();
        store.create_task(TaskRecord::pending(id, &package())).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_new_record_is_pending() {
        let dir = TempDir::new().unwrap();
        let (store, id) = store_with_task(&dir).await;

        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0);
        assert_eq!(record.message, "Pending");
        assert_eq!(record.categories, vec!["Furniture", "Sofas"]);
        assert_eq!(record.image_list, vec!["/models/sofa.png"]);
    }

    #[tokio::test]
    async fn test_persistence_across_reload() {
        let dir = TempDir::new().unwrap();
        let id = {
            let (store, id) = store_with_task(&dir).await;
            store.record_status(id, TaskStatus::fail("Network error: reset")).await.unwrap();
            id
        };

        let store = TaskStore::new(dir.path().to_path_buf()).await.unwrap();
        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::fail("Network error: reset"));
        assert_eq!(record.message, "Network error: reset");
        assert_eq!(store.list_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_active_tasks_become_interrupted_on_load() {
        let dir = TempDir::new().unwrap();
        let (running, uploaded) = {
            let store = TaskStore::new(dir.path().to_path_buf()).await.unwrap();
            let running = TaskId::new();
            let uploaded = TaskId::new();
            store.create_task(TaskRecord::pending(running, &package())).await.unwrap();
            store.create_task(TaskRecord::pending(uploaded, &package())).await.unwrap();
            store.record_progress(running, 40, "Uploading model").await.unwrap();
            store.record_status(uploaded, TaskStatus::Uploaded).await.unwrap();
            (running, uploaded)
        };

        let store = TaskStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.get(running).await.unwrap().status, TaskStatus::Interrupted);
        assert_eq!(store.get(uploaded).await.unwrap().status, TaskStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_first_progress_marks_running() {
        let dir = TempDir::new().unwrap();
        let (store, id) = store_with_task(&dir).await;

        store.record_progress(id, 35, "Uploading model").await.unwrap();
        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Running);
        assert_eq!(record.progress, 35);
        assert_eq!(record.message, "Uploading model");
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let dir = TempDir::new().unwrap();
        let (store, id) = store_with_task(&dir).await;

        store.record_status(id, TaskStatus::Finished).await.unwrap();
        store.record_status(id, TaskStatus::Running).await.unwrap();
        store.record_progress(id, 10, "late").await.unwrap();

        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Finished);
        assert_ne!(record.message, "late");
    }

    #[tokio::test]
    async fn test_repeated_writes_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let (store, id) = store_with_task(&dir).await;
        let mut results = CombinedResult::new();
        results.insert(LegId::object_store(), LegPayload::new("Furniture/Sofas/sofa.blend", vec![]));

        for _ in 0..2 {
            store.create_task(TaskRecord::pending(id, &package())).await.unwrap();
            store.record_final_attributes(id, &results).await.unwrap();
            store.record_model_id(id, "99").await.unwrap();
        }

        let record = store.get(id).await.unwrap();
        assert_eq!(record.results, Some(results));
        assert_eq!(record.model_id.as_deref(), Some("99"));
        assert_eq!(store.list_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_create_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (store, id) = store_with_task(&dir).await;
        let mut other = TaskRecord::pending(id, &package());
        other.name = "Different".into();

        assert!(store.create_task(other).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_task_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path().to_path_buf()).await.unwrap();

        assert!(store.record_progress(TaskId::new(), 1, "x").await.is_err());
        assert!(store.get(TaskId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(TASKS_FILE), "{not json").unwrap();

        let store = TaskStore::new(dir.path().to_path_buf()).await.unwrap();
        assert!(store.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_in_creation_order() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path().to_path_buf()).await.unwrap();
        let ids: Vec<TaskId> = (0..3).map(|_| TaskId::new()).collect();
        for id in ids.iter().rev() {
            store.create_task(TaskRecord::pending(*id, &package())).await.unwrap();
        }

        let listed: Vec<TaskId> = store.list_tasks().await.iter().map(|r| r.id).collect();
        assert_eq!(listed, ids);
    }
}
