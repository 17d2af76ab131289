//! Leg identifiers and per-leg results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const OBJECT_STORE_LEG: &str = "s3";
const CLOUD_DRIVE_LEG: &str = "google_drive";

/// Short symbolic tag naming one leg inside a task
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegId(String);

impl LegId {
    pub fn new(tag: impl Into<String>) -> Self {
        LegId(tag.into())
    }

    /// The S3-compatible object store leg
    pub fn object_store() -> Self {
        LegId::new(OBJECT_STORE_LEG)
    }

    /// The cloud drive leg
    pub fn cloud_drive() -> Self {
        LegId::new(CLOUD_DRIVE_LEG)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LegId {
    fn from(tag: &str) -> Self {
        LegId::new(tag)
    }
}

/// Backend references produced by a successful leg
///
/// For the object store these are object keys, for the cloud drive item ids.
/// `images` keeps the upload order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegPayload {
    pub model: String,
    pub images: Vec<String>,
}

impl LegPayload {
    pub fn new(model: impl Into<String>, images: Vec<String>) -> Self {
        LegPayload {
            model: model.into(),
            images,
        }
    }
}

/// Payloads of every leg of a task, keyed by leg
pub type CombinedResult = BTreeMap<LegId, LegPayload>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_legs() {
        assert_eq!(LegId::object_store().as_str(), "s3");
        assert_eq!(LegId::cloud_drive().as_str(), "google_drive");
    }

    #[test]
    fn test_combined_result_serializes_with_leg_keys() {
        let mut result = CombinedResult::new();
        result.insert(LegId::object_store(), LegPayload::new("a/b/m.blend", vec![]));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["s3"]["model"], "a/b/m.blend");
    }
}
