#![forbid(unsafe_code)]
mod cli;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command, UploadArgs};
use color_eyre::eyre::{self, eyre};
use modelsync::model::events::TaskEvent;
use modelsync::services::catalog::HttpCatalog;
use modelsync::services::cloud_drive::GoogleDriveClient;
use modelsync::services::coordinator::{UploadBackends, UploadCoordinator};
use modelsync::services::object_store::S3ObjectStore;
use modelsync::services::task_store::TaskStore;
use modelsync::settings::app_settings::AppSettings;
use modelsync::settings::file_credentials;
use modelsync::utils::{format_task_line, get_data_dir, initialize_logging, initialize_panic_handler};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    initialize_logging()?;
    initialize_panic_handler()?;
    let args = Cli::parse();

    let settings = match &args.config {
        Some(path) => AppSettings::load_from(path)?,
        None => AppSettings::load()?,
    };
    let store = Arc::new(TaskStore::new(get_data_dir()).await?);

    match args.command {
        Command::List => {
            list_tasks(&store).await;
            Ok(())
        }
        Command::Upload(upload) => run_upload(args.creds, &settings, store, upload).await,
    }
}

async fn list_tasks(store: &TaskStore) {
    let tasks = store.list_tasks().await;
    if tasks.is_empty() {
        println!("No tasks yet.");
    }
    for task in tasks {
        println!(
            "{}  {}",
            task.id,
            format_task_line(&task.name, task.progress, &task.status.to_string())
        );
    }
}

async fn run_upload(
    creds: Option<PathBuf>,
    settings: &AppSettings,
    store: Arc<TaskStore>,
    upload: UploadArgs,
) -> eyre::Result<()> {
    let credential = file_credentials::selected_credential(creds)?;
    tracing::info!("uploading with credentials {}", credential.name);
    let package = upload.into_package()?;

    let backends = UploadBackends {
        object_store: Arc::new(
            S3ObjectStore::new(&credential, settings.object_store.bucket.clone()).await,
        ),
        cloud_drive: Arc::new(GoogleDriveClient::new(&settings.cloud_drive)),
        catalog: Arc::new(HttpCatalog::new(&settings.catalog)),
    };
    let coordinator = UploadCoordinator::new(store, backends, &settings.workers);
    let mut events = BroadcastStream::new(coordinator.subscribe());

    let name = package.metadata.display_name.clone();
    let task_id = match coordinator.submit(package).await {
        Ok(id) => id,
        Err(e) => {
            coordinator.shutdown().await;
            return Err(e.into());
        }
    };
    println!("Task {} started", task_id);

    let outcome = loop {
        tokio::select! {
            next = events.next() => match next {
                Some(Ok(event)) if event.task_id() == task_id => match event {
                    TaskEvent::Progress { percent, message, .. } => {
                        eprint!("\r{}", format_task_line(&name, percent, &message));
                        let _ = std::io::stderr().flush();
                    }
                    TaskEvent::Failed { failure, .. } => {
                        break Err(eyre!("Upload failed: {}", failure));
                    }
                    TaskEvent::Committed { model_id, .. } => {
                        eprintln!();
                        println!("Committed as model {}", model_id);
                        break Ok(());
                    }
                    TaskEvent::CommitFailed { error, .. } => {
                        break Err(eyre!("Uploaded, but the catalog commit failed: {}", error));
                    }
                    TaskEvent::Uploaded { .. } | TaskEvent::Finished { .. } => {}
                },
                Some(Ok(_)) => {}
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::debug!("progress display skipped {} events", skipped);
                }
                None => break Err(eyre!("Event bus closed before task {} ended", task_id)),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("exited per user request");
                break Err(eyre!("Interrupted, task {} will show as interrupted", task_id));
            }
        }
    };

    coordinator.shutdown().await;
    if outcome.is_err() {
        eprintln!();
    }
    outcome
}
