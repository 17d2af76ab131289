//! The model package a user submits: one model file, preview images and catalog metadata

use crate::model::error::CategoryError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Replace every character outside `[\w. -]` with an underscore
///
/// The result is safe to use as an object key segment or a drive item name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '.' | ' ' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitized file name of a local path, `unnamed` when the path has none
pub fn sanitized_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| sanitize_name(&n.to_string_lossy()))
        .unwrap_or_else(|| "unnamed".to_string())
}

/// Ordered, non-empty list of category labels, root first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CategoryPath(Vec<String>);

impl CategoryPath {
    pub fn new<I, S>(labels: I) -> Result<Self, CategoryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(CategoryError::Empty);
        }
        if let Some(idx) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(CategoryError::BlankLabel(idx));
        }
        Ok(CategoryPath(labels))
    }

    /// Labels as entered by the user
    pub fn labels(&self) -> &[String] {
        &self.0
    }

    /// Labels made safe for backend keys and folder names
    pub fn sanitized(&self) -> Vec<String> {
        self.0.iter().map(|l| sanitize_name(l)).collect()
    }

    /// Object-store key for `file_name` under this category path
    pub fn object_key(&self, file_name: &str) -> String {
        let mut segments = self.sanitized();
        segments.push(sanitize_name(file_name));
        segments.join("/")
    }
}

impl TryFrom<Vec<String>> for CategoryPath {
    type Error = CategoryError;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        CategoryPath::new(labels)
    }
}

impl From<CategoryPath> for Vec<String> {
    fn from(path: CategoryPath) -> Self {
        path.0
    }
}

/// Catalog metadata attached to a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub display_name: String,
    pub category_path: CategoryPath,
    pub blender_version: String,
    pub render_engine: String,
}

/// Everything one upload task needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPackage {
    pub model_path: PathBuf,
    pub image_paths: Vec<PathBuf>,
    pub metadata: ModelMetadata,
}

impl ModelPackage {
    /// Local files that must exist before the task can start
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.model_path.as_path()).chain(self.image_paths.iter().map(|p| p.as_path()))
    }

    /// Sanitized name the model file is stored under
    pub fn model_file_name(&self) -> String {
        sanitized_file_name(&self.model_path)
    }
}
