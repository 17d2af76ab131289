//! Cloud drive backend (Google Drive v3 REST)

use crate::model::error::{DriveError, DriveResult};
use crate::model::transfer_progress::TransferProgress;
use crate::settings::app_settings::CloudDriveSettings;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::Sender;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const ROOT_FOLDER: &str = "root";
const CHUNK_SIZE: usize = 256 * 1024;

/// Folder tree and file upload operations of a cloud drive
#[async_trait]
pub trait CloudDrive: Send + Sync {
    /// Id of the folder the category tree hangs off
    fn root_folder(&self) -> String;

    async fn find_folder(&self, name: &str, parent: &str) -> DriveResult<Option<String>>;

    async fn create_folder(&self, name: &str, parent: &str) -> DriveResult<String>;

    /// Upload `local_path` as `name` inside `parent`, returns the new item id
    async fn upload_file(
        &self,
        local_path: &Path,
        name: &str,
        parent: &str,
        progress: Sender<TransferProgress>,
    ) -> DriveResult<String>;

    async fn find_or_create_folder(&self, name: &str, parent: &str) -> DriveResult<String> {
        if let Some(id) = self.find_folder(name, parent).await? {
            return Ok(id);
        }
        tracing::debug!("creating drive folder {} under {}", name, parent);
        self.create_folder(name, parent).await
    }
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DriveItemList {
    #[serde(default)]
    files: Vec<DriveItem>,
}

#[derive(Clone)]
pub struct GoogleDriveClient {
    http: reqwest::Client,
    access_token: String,
    api_base: String,
    root_folder_id: String,
}

impl GoogleDriveClient {
    pub fn new(settings: &CloudDriveSettings) -> Self {
        GoogleDriveClient {
            http: reqwest::Client::new(),
            access_token: settings.access_token.clone(),
            api_base: settings
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            root_folder_id: settings
                .root_folder_id
                .clone()
                .unwrap_or_else(|| ROOT_FOLDER.to_string()),
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Drive query literals are single-quoted; quotes and backslashes are escaped
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn folder_query(name: &str, parent: &str) -> String {
    format!(
        "name = {} and mimeType = {} and {} in parents and trashed = false",
        quote(name),
        quote(FOLDER_MIME_TYPE),
        quote(parent)
    )
}

async fn check_status(response: reqwest::Response) -> DriveResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let message = response.text().await.unwrap_or_default();
        Err(DriveError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

/// Opening and closing parts of a `multipart/related` upload around the file bytes
fn multipart_frame(boundary: &str, metadata: &serde_json::Value) -> (Bytes, Bytes) {
    let head = format!(
        "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");
    (Bytes::from(head), Bytes::from(tail))
}

fn new_boundary() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("modelsync_{}", suffix)
}

#[async_trait]
impl CloudDrive for GoogleDriveClient {
    fn root_folder(&self) -> String {
        self.root_folder_id.clone()
    }

    async fn find_folder(&self, name: &str, parent: &str) -> DriveResult<Option<String>> {
        let response = self
            .http
            .get(format!("{}/drive/v3/files", self.api_base))
            .header(AUTHORIZATION, self.bearer())
            .query(&[
                ("q", folder_query(name, parent)),
                ("fields", "files(id)".to_string()),
                ("spaces", "drive".to_string()),
            ])
            .send()
            .await?;
        let list: DriveItemList = check_status(response).await?.json().await?;
        Ok(list.files.into_iter().next().map(|item| item.id))
    }

    async fn create_folder(&self, name: &str, parent: &str) -> DriveResult<String> {
        let response = self
            .http
            .post(format!("{}/drive/v3/files", self.api_base))
            .header(AUTHORIZATION, self.bearer())
            .query(&[("fields", "id")])
            .json(&serde_json::json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent],
            }))
            .send()
            .await?;
        let item: DriveItem = check_status(response).await?.json().await?;
        Ok(item.id)
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        name: &str,
        parent: &str,
        progress: Sender<TransferProgress>,
    ) -> DriveResult<String> {
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| DriveError::Io(format!("{}: {}", local_path.display(), e)))?;
        let total_bytes = file
            .metadata()
            .await
            .map_err(|e| DriveError::Io(format!("{}: {}", local_path.display(), e)))?
            .len();

        let boundary = new_boundary();
        let metadata = serde_json::json!({ "name": name, "parents": [parent] });
        let (head, tail) = multipart_frame(&boundary, &metadata);
        let content_length = head.len() as u64 + total_bytes + tail.len() as u64;

        let file_chunks = stream::unfold(Some((file, 0u64)), move |state| {
            let progress = progress.clone();
            async move {
                let (mut file, sent) = state?;
                let mut buf = vec![0u8; CHUNK_SIZE];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        let sent = sent + n as u64;
                        // Use try_send to avoid blocking transfers when channel is full
                        let _ = progress.try_send(TransferProgress {
                            bytes_sent: sent,
                            total_bytes,
                        });
                        Some((Ok(Bytes::from(buf)), Some((file, sent))))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        });
        let body = stream::once(async move { Ok::<_, std::io::Error>(head) })
            .chain(file_chunks)
            .chain(stream::once(async move { Ok(tail) }));

        tracing::debug!("uploading {} to drive folder {}", local_path.display(), parent);
        let response = self
            .http
            .post(format!("{}/upload/drive/v3/files", self.api_base))
            .header(AUTHORIZATION, self.bearer())
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .header(CONTENT_LENGTH, content_length)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        let item: DriveItem = check_status(response).await?.json().await?;
        Ok(item.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_http;
    use std::io::Write;
    use tokio::sync::mpsc;

    fn client(api_base: String) -> GoogleDriveClient {
        GoogleDriveClient::new(&CloudDriveSettings {
            access_token: "token-123".into(),
            root_folder_id: None,
            api_base: Some(api_base),
        })
    }

    #[test]
    fn test_query_escapes_quotes() {
        assert_eq!(quote("it's"), r"'it\'s'");
        assert_eq!(quote(r"a\b"), r"'a\\b'");
        let q = folder_query("Chairs", "root");
        assert!(q.starts_with("name = 'Chairs' and mimeType = 'application/vnd.google-apps.folder'"));
        assert!(q.contains("'root' in parents"));
    }

    #[test]
    fn test_root_defaults_to_drive_root() {
        let drive = client("http://localhost".into());
        assert_eq!(drive.root_folder(), "root");

        let drive = GoogleDriveClient::new(&CloudDriveSettings {
            access_token: String::new(),
            root_folder_id: Some("shared-folder".into()),
            api_base: None,
        });
        assert_eq!(drive.root_folder(), "shared-folder");
        assert_eq!(drive.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn test_multipart_frame_wraps_metadata() {
        let (head, tail) = multipart_frame("xyz", &serde_json::json!({"name": "a.blend"}));
        let head = String::from_utf8(head.to_vec()).unwrap();
        assert!(head.starts_with("--xyz\r\nContent-Type: application/json"));
        assert!(head.contains(r#"{"name":"a.blend"}"#));
        assert!(head.ends_with("Content-Type: application/octet-stream\r\n\r\n"));
        assert_eq!(&tail[..], b"\r\n--xyz--\r\n");
    }

    #[tokio::test]
    async fn test_find_folder_returns_first_match() {
        let (url, server) =
            test_http::serve(vec![(200, r#"{"files":[{"id":"f1"},{"id":"f2"}]}"#.into())]).await;
        let drive = client(url);

        let found = drive.find_folder("Chairs", "root").await.unwrap();
        assert_eq!(found.as_deref(), Some("f1"));

        let requests = server.await.unwrap();
        assert!(requests[0].request_line.starts_with("GET /drive/v3/files?q="));
        assert_eq!(requests[0].header("authorization"), Some("Bearer token-123"));
    }

    #[tokio::test]
    async fn test_find_or_create_creates_missing_folder() {
        let (url, server) = test_http::serve(vec![
            (200, r#"{"files":[]}"#.into()),
            (200, r#"{"id":"new-folder"}"#.into()),
        ])
        .await;
        let drive = client(url);

        let id = drive.find_or_create_folder("Tables", "root").await.unwrap();
        assert_eq!(id, "new-folder");

        let requests = server.await.unwrap();
        assert!(requests[1].request_line.starts_with("POST /drive/v3/files"));
        let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(body["mimeType"], FOLDER_MIME_TYPE);
        assert_eq!(body["parents"][0], "root");
    }

    #[tokio::test]
    async fn test_upload_streams_multipart_and_reports_progress() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"blender-bytes").unwrap();
        let (url, server) = test_http::serve(vec![(200, r#"{"id":"item-9"}"#.into())]).await;
        let drive = client(url);
        let (tx, mut rx) = mpsc::channel(16);

        let id = drive
            .upload_file(file.path(), "chair.blend", "folder-1", tx)
            .await
            .unwrap();
        assert_eq!(id, "item-9");

        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(last.bytes_sent, 13);
        assert_eq!(last.total_bytes, 13);

        let requests = server.await.unwrap();
        let request = &requests[0];
        assert!(request
            .request_line
            .starts_with("POST /upload/drive/v3/files?uploadType=multipart"));
        assert!(request
            .header("content-type")
            .unwrap()
            .starts_with("multipart/related; boundary=modelsync_"));
        let body = request.body_text();
        assert!(body.contains(r#""name":"chair.blend""#));
        assert!(body.contains("blender-bytes"));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let (url, _server) =
            test_http::serve(vec![(403, r#"{"error":"insufficientPermissions"}"#.into())]).await;
        let drive = client(url);

        let err = drive.create_folder("Chairs", "root").await.unwrap_err();
        assert_eq!(
            err,
            DriveError::Http {
                status: 403,
                message: r#"{"error":"insufficientPermissions"}"#.into()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let drive = client("http://127.0.0.1:9".into());
        let (tx, _rx) = mpsc::channel(1);
        let err = drive
            .upload_file(Path::new("/definitely/not/here.blend"), "x", "root", tx)
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::Io(_)));
    }
}
