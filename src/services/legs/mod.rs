//! Concrete upload legs and the package walk they share
//!
//! Every leg uploads the model file first, then the preview images in order,
//! spreading its progress according to `progress_budget`.

pub mod cloud_drive_leg;
pub mod object_store_leg;

pub use cloud_drive_leg::DriveLeg;
pub use object_store_leg::S3Leg;

use crate::model::error::LegResult;
use crate::model::leg::LegPayload;
use crate::model::package::{sanitized_file_name, ModelPackage};
use crate::model::progress_budget::{
    image_finished, image_message, image_started, model_progress, MODEL_SHARE,
};
use crate::model::transfer_progress::TransferProgress;
use crate::services::leg::LegReporter;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc::{self, Sender};

const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// Backend-specific storage of a single file
#[async_trait]
pub(crate) trait PackageSink: Send + Sync {
    /// Store the file under its sanitized `name`, returns the backend reference
    async fn put(
        &self,
        path: &Path,
        name: &str,
        progress: Sender<TransferProgress>,
    ) -> LegResult<String>;
}

/// Upload model and images through `sink`, reporting budgeted progress
pub(crate) async fn upload_package(
    package: &ModelPackage,
    sink: &dyn PackageSink,
    reporter: &LegReporter,
) -> LegResult<LegPayload> {
    // Fail on unreadable local files before touching the backend
    for path in package.files() {
        tokio::fs::metadata(path).await?;
    }

    let model_name = package.model_file_name();
    let (tx, mut rx) = mpsc::channel::<TransferProgress>(PROGRESS_CHANNEL_CAPACITY);
    let forward = async {
        while let Some(p) = rx.recv().await {
            reporter.progress(model_progress(p.bytes_sent, p.total_bytes), "Uploading model");
        }
    };
    let (model, ()) = tokio::join!(sink.put(&package.model_path, &model_name, tx), forward);
    let model = model?;
    reporter.progress(MODEL_SHARE, "Uploaded model");

    let count = package.image_paths.len();
    let mut images = Vec::with_capacity(count);
    for (index, path) in package.image_paths.iter().enumerate() {
        reporter.progress(
            image_started(index, count),
            image_message("Uploading", index, count),
        );
        // images only report at their budget points
        let (tx, _) = mpsc::channel(1);
        images.push(sink.put(path, &sanitized_file_name(path), tx).await?);
        reporter.progress(
            image_finished(index, count),
            image_message("Uploaded", index, count),
        );
    }
    if count == 0 {
        reporter.progress(100.0, "Upload complete");
    }

    Ok(LegPayload::new(model, images))
}
