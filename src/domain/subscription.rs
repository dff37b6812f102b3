//! Source subscriptions: the link from an article source to a target,
//! carrying the ingestion watermark.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maps one article source onto one target, with keyword filters and the
/// `last_processed_at` watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSubscription {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub keywords_include: Vec<String>,
    #[serde(default)]
    pub keywords_exclude: Vec<String>,
    /// Watermark: the max `first_seen_at` already processed. Advances
    /// monotonically and only when a batch actually processed articles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Per-subscription fetch cap when the caller passes no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_limit: Option<usize>,
}

impl SourceSubscription {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            keywords_include: Vec::new(),
            keywords_exclude: Vec::new(),
            last_processed_at: None,
            is_active: true,
            default_limit: None,
        }
    }

    pub fn with_keywords(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.keywords_include = include;
        self.keywords_exclude = exclude;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = Some(limit);
        self
    }
}
