//! Catalog API client that registers an uploaded model

use crate::model::error::CatalogError;
use crate::model::leg::{CombinedResult, LegId, LegPayload};
use crate::model::package::ModelMetadata;
use crate::settings::app_settings::CatalogSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body of `POST /model`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub name: String,
    pub category_list: Vec<String>,
    pub r2_model_path: String,
    pub r2_image_path_list: Vec<String>,
    pub google_drive_model_path: String,
    pub google_drive_image_path_list: Vec<String>,
    pub blender_version: String,
    pub render_engine: String,
}

impl CommitRequest {
    /// Combine the package metadata with the object store and drive results
    pub fn from_results(
        metadata: &ModelMetadata,
        results: &CombinedResult,
    ) -> Result<Self, CatalogError> {
        let payload = |leg: LegId| -> Result<&LegPayload, CatalogError> {
            results.get(&leg).ok_or(CatalogError::MissingLeg(leg))
        };
        let object_store = payload(LegId::object_store())?;
        let cloud_drive = payload(LegId::cloud_drive())?;

        Ok(CommitRequest {
            name: metadata.display_name.clone(),
            category_list: metadata.category_path.labels().to_vec(),
            r2_model_path: object_store.model.clone(),
            r2_image_path_list: object_store.images.clone(),
            google_drive_model_path: cloud_drive.model.clone(),
            google_drive_image_path_list: cloud_drive.images.clone(),
            blender_version: metadata.blender_version.clone(),
            render_engine: metadata.render_engine.clone(),
        })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Register the model, returns the catalog's id for it
    async fn commit_model(&self, request: &CommitRequest) -> Result<String, CatalogError>;
}

/// The catalog answers with either a numeric or a string id
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelId {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    id: ModelId,
}

#[derive(Clone)]
pub struct HttpCatalog {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpCatalog {
    pub fn new(settings: &CatalogSettings) -> Self {
        HttpCatalog {
            http: reqwest::Client::new(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            timeout: settings.timeout(),
        }
    }
}

#[async_trait]
impl CatalogApi for HttpCatalog {
    async fn commit_model(&self, request: &CommitRequest) -> Result<String, CatalogError> {
        tracing::debug!("committing {} to {}", request.name, self.endpoint);
        let response = self
            .http
            .post(format!("{}/model", self.endpoint))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| CatalogError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CommitResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
        Ok(match parsed.id {
            ModelId::Text(id) => id,
            ModelId::Number(id) => id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::package::CategoryPath;
    use crate::services::test_http;

    fn metadata() -> ModelMetadata {
        ModelMetadata {
            display_name: "Oak Chair".into(),
            category_path: CategoryPath::new(["Furniture", "Chairs"]).unwrap(),
            blender_version: "4.1".into(),
            render_engine: "Cycles".into(),
        }
    }

    fn results() -> CombinedResult {
        let mut results = CombinedResult::new();
        results.insert(
            LegId::object_store(),
            LegPayload::new(
                "Furniture/Chairs/oak.blend",
                vec!["Furniture/Chairs/front.png".into()],
            ),
        );
        results.insert(
            LegId::cloud_drive(),
            LegPayload::new("drive-model", vec!["drive-front".into()]),
        );
        results
    }

    fn settings(endpoint: String) -> CatalogSettings {
        CatalogSettings {
            endpoint,
            timeout_secs: 2,
        }
    }

    #[test]
    fn test_request_picks_payloads_by_leg() {
        let request = CommitRequest::from_results(&metadata(), &results()).unwrap();
        assert_eq!(request.name, "Oak Chair");
        assert_eq!(request.category_list, vec!["Furniture", "Chairs"]);
        assert_eq!(request.r2_model_path, "Furniture/Chairs/oak.blend");
        assert_eq!(request.r2_image_path_list, vec!["Furniture/Chairs/front.png"]);
        assert_eq!(request.google_drive_model_path, "drive-model");
        assert_eq!(request.google_drive_image_path_list, vec!["drive-front"]);
    }

    #[test]
    fn test_request_requires_both_legs() {
        let mut partial = results();
        partial.remove(&LegId::cloud_drive());
        assert_eq!(
            CommitRequest::from_results(&metadata(), &partial),
            Err(CatalogError::MissingLeg(LegId::cloud_drive()))
        );
    }

    #[test]
    fn test_wire_field_names() {
        let request = CommitRequest::from_results(&metadata(), &results()).unwrap();
        let json = serde_json::to_value(&request).unwrap();
        for field in [
            "name",
            "category_list",
            "r2_model_path",
            "r2_image_path_list",
            "google_drive_model_path",
            "google_drive_image_path_list",
            "blender_version",
            "render_engine",
        ] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
    }

    #[tokio::test]
    async fn test_commit_returns_numeric_id_as_string() {
        let (url, server) = test_http::serve(vec![(201, r#"{"id": 42}"#.into())]).await;
        let catalog = HttpCatalog::new(&settings(url));
        let request = CommitRequest::from_results(&metadata(), &results()).unwrap();

        assert_eq!(catalog.commit_model(&request).await.unwrap(), "42");

        let requests = server.await.unwrap();
        assert!(requests[0].request_line.starts_with("POST /model "));
        let sent: CommitRequest = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent, request);
    }

    #[tokio::test]
    async fn test_commit_accepts_string_id() {
        let (url, _server) = test_http::serve(vec![(200, r#"{"id":"m-7"}"#.into())]).await;
        let catalog = HttpCatalog::new(&settings(format!("{}/", url)));
        let request = CommitRequest::from_results(&metadata(), &results()).unwrap();

        assert_eq!(catalog.commit_model(&request).await.unwrap(), "m-7");
    }

    #[tokio::test]
    async fn test_rejection_keeps_status_and_body() {
        let (url, _server) = test_http::serve(vec![(422, r#"{"error":"bad"}"#.into())]).await;
        let catalog = HttpCatalog::new(&settings(url));
        let request = CommitRequest::from_results(&metadata(), &results()).unwrap();

        assert_eq!(
            catalog.commit_model(&request).await,
            Err(CatalogError::Rejected {
                status: 422,
                body: r#"{"error":"bad"}"#.into()
            })
        );
    }

    #[tokio::test]
    async fn test_missing_id_is_invalid_response() {
        let (url, _server) = test_http::serve(vec![(200, r#"{"ok":true}"#.into())]).await;
        let catalog = HttpCatalog::new(&settings(url));
        let request = CommitRequest::from_results(&metadata(), &results()).unwrap();

        assert!(matches!(
            catalog.commit_model(&request).await,
            Err(CatalogError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_catalog() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let catalog = HttpCatalog::new(&settings(url));
        let request = CommitRequest::from_results(&metadata(), &results()).unwrap();

        assert!(matches!(
            catalog.commit_model(&request).await,
            Err(CatalogError::Unreachable(_))
        ));
    }
}
