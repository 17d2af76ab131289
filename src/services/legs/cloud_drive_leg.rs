use crate::model::error::LegResult;
use crate::model::leg::{LegId, LegPayload};
use crate::model::package::{CategoryPath, ModelPackage};
use crate::model::task_id::TaskId;
use crate::model::transfer_progress::TransferProgress;
use crate::services::cloud_drive::CloudDrive;
use crate::services::leg::{LegReporter, UploadLeg};
use crate::services::legs::{upload_package, PackageSink};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

/// Uploads a package into a folder tree mirroring the category path
pub struct DriveLeg {
    id: LegId,
    task_id: TaskId,
    package: Arc<ModelPackage>,
    drive: Arc<dyn CloudDrive>,
}

impl DriveLeg {
    pub fn new(task_id: TaskId, package: Arc<ModelPackage>, drive: Arc<dyn CloudDrive>) -> Self {
        DriveLeg {
            id: LegId::cloud_drive(),
            task_id,
            package,
            drive,
        }
    }
}

/// Walk the category labels from the root, creating missing folders
async fn resolve_folder(drive: &dyn CloudDrive, category_path: &CategoryPath) -> LegResult<String> {
    let mut parent = drive.root_folder();
    for label in category_path.sanitized() {
        parent = drive.find_or_create_folder(&label, &parent).await?;
    }
    Ok(parent)
}

struct FolderSink<'a> {
    drive: &'a dyn CloudDrive,
    folder: String,
}

#[async_trait]
impl PackageSink for FolderSink<'_> {
    async fn put(
        &self,
        path: &Path,
        name: &str,
        progress: Sender<TransferProgress>,
    ) -> LegResult<String> {
        Ok(self.drive.upload_file(path, name, &self.folder, progress).await?)
    }
}

#[async_trait]
impl UploadLeg for DriveLeg {
    fn id(&self) -> &LegId {
        &self.id
    }

    fn task_id(&self) -> TaskId {
        self.task_id
    }

    async fn upload(self: Box<Self>, reporter: &LegReporter) -> LegResult<LegPayload> {
        reporter.progress(0.0, "Preparing folders");
        let folder = resolve_folder(self.drive.as_ref(), &self.package.metadata.category_path).await?;
        tracing::debug!("task {} uploads into drive folder {}", self.task_id, folder);

        let sink = FolderSink {
            drive: self.drive.as_ref(),
            folder,
        };
        upload_package(&self.package, &sink, reporter).await
    }
}
