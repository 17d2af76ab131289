use crate::model::error::LegResult;
use crate::model::leg::{LegId, LegPayload};
use crate::model::package::{CategoryPath, ModelPackage};
use crate::model::task_id::TaskId;
use crate::model::transfer_progress::TransferProgress;
use crate::services::leg::{LegReporter, UploadLeg};
use crate::services::legs::{upload_package, PackageSink};
use crate::services::object_store::ObjectStore;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

/// Uploads a package to the object store under `<categories>/<file>` keys
pub struct S3Leg {
    id: LegId,
    task_id: TaskId,
    package: Arc<ModelPackage>,
    store: Arc<dyn ObjectStore>,
}

impl S3Leg {
    pub fn new(task_id: TaskId, package: Arc<ModelPackage>, store: Arc<dyn ObjectStore>) -> Self {
        S3Leg {
            id: LegId::object_store(),
            task_id,
            package,
            store,
        }
    }
}

struct KeyedSink<'a> {
    store: &'a dyn ObjectStore,
    category_path: &'a CategoryPath,
}

#[async_trait]
impl PackageSink for KeyedSink<'_> {
    async fn put(
        &self,
        path: &Path,
        name: &str,
        progress: Sender<TransferProgress>,
    ) -> LegResult<String> {
        let key = self.category_path.object_key(name);
        self.store.upload_file(path, &key, progress).await?;
        Ok(key)
    }
}

#[async_trait]
impl UploadLeg for S3Leg {
    fn id(&self) -> &LegId {
        &self.id
    }

    fn task_id(&self) -> TaskId {
        self.task_id
    }

    async fn upload(self: Box<Self>, reporter: &LegReporter) -> LegResult<LegPayload> {
        let sink = KeyedSink {
            store: self.store.as_ref(),
            category_path: &self.package.metadata.category_path,
        };
        upload_package(&self.package, &sink, reporter).await
    }
}
