use crate::model::leg::CombinedResult;
use crate::model::package::ModelPackage;
use crate::model::task_id::TaskId;
use crate::model::task_status::TaskStatus;
use serde::{Deserialize, Serialize};

/// Everything the task store keeps about one upload task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub path: String,
    pub blender_version: String,
    pub render_engine: String,
    pub categories: Vec<String>,
    pub image_list: Vec<String>,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default)]
    pub results: Option<CombinedResult>,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl TaskRecord {
    /// A fresh, pending record for a package that was just submitted
    pub fn pending(id: TaskId, package: &ModelPackage) -> Self {
        let metadata = &package.metadata;
        TaskRecord {
            id,
            name: metadata.display_name.clone(),
            path: package.model_path.to_string_lossy().into_owned(),
            blender_version: metadata.blender_version.clone(),
            render_engine: metadata.render_engine.clone(),
            categories: metadata.category_path.labels().to_vec(),
            image_list: package
                .image_paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "Pending".to_string(),
            results: None,
            model_id: None,
        }
    }
}
