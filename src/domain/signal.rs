//! Target-scoped signals extracted from articles. Append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::direction::Direction;

/// Structured metadata carried alongside a signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_phrases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Unknown keys pass through opaquely.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// A target-scoped observation extracted from one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub target_id: String,
    pub source_id: String,
    pub url: String,
    pub content: String,
    pub direction: Direction,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: SignalMetadata,
    #[serde(default)]
    pub is_test: bool,
}

impl Signal {
    pub fn new(
        target_id: impl Into<String>,
        source_id: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
        direction: Direction,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.into(),
            source_id: source_id.into(),
            url: url.into(),
            content: content.into(),
            direction,
            detected_at,
            metadata: SignalMetadata::default(),
            is_test: false,
        }
    }

    pub fn with_metadata(mut self, metadata: SignalMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn as_test(mut self) -> Self {
        self.is_test = true;
        self
    }
}
