//! Minimal feature and feature-revision value types.
//!
//! This crate only serializes them into hook arguments; persistence and the
//! rest of the feature payload live in the surrounding application, so the
//! payload passes through as-is.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: String,
    #[serde(default)]
    pub project: String,
    /// Remaining feature payload, handed to hooks untouched.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Feature {
    pub fn new(id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project: project.into(),
            payload: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRevision {
    pub feature_id: String,
    pub version: u64,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl FeatureRevision {
    pub fn new(feature_id: impl Into<String>, version: u64) -> Self {
        Self {
            feature_id: feature_id.into(),
            version,
            payload: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}
