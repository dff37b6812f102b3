//! Crawled articles and dedup fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hex SHA-256 of a text payload, used for `(source_id, content_hash)` dedup.
pub fn content_hash_of(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Fingerprint over title + url, for near-duplicate detection across sources.
pub fn fingerprint_of(title: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().to_lowercase().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(url.trim().as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A crawled document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub source_id: String,
    pub url: String,
    pub title: String,
    /// Full text; absent when the crawler only captured a summary.
    pub content: Option<String>,
    pub summary: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub content_hash: String,
    pub fingerprint_hash: String,
    #[serde(default)]
    pub key_phrases: Vec<String>,
    #[serde(default)]
    pub is_test: bool,
}

impl Article {
    /// Build an article, computing both hashes from the payload.
    pub fn new(
        source_id: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        content: Option<String>,
        first_seen_at: DateTime<Utc>,
    ) -> Self {
        let source_id = source_id.into();
        let url = url.into();
        let title = title.into();
        let hash_basis = content.as_deref().unwrap_or(title.as_str());
        let content_hash = content_hash_of(hash_basis);
        let fingerprint_hash = fingerprint_of(&title, &url);
        Self {
            id: Uuid::new_v4().to_string(),
            source_id,
            url,
            title,
            content,
            summary: None,
            first_seen_at,
            content_hash,
            fingerprint_hash,
            key_phrases: Vec::new(),
            is_test: false,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_key_phrases(mut self, phrases: Vec<String>) -> Self {
        self.key_phrases = phrases;
        self
    }

    pub fn as_test(mut self) -> Self {
        self.is_test = true;
        self
    }

    /// Body text for filtering and prompting: content, falling back to
    /// summary, falling back to empty.
    pub fn body(&self) -> &str {
        self.content
            .as_deref()
            .or(self.summary.as_deref())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(content: Option<&str>) -> Article {
        Article::new(
            "src-1",
            "https://news.example/a",
            "Apple beats estimates",
            content.map(String::from),
            Utc::now(),
        )
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = sample(Some("Q3 revenue up 12%"));
        let b = sample(Some("Q3 revenue up 12%"));
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_hash_differs_by_content() {
        let a = sample(Some("Q3 revenue up 12%"));
        let b = sample(Some("Q3 revenue down 12%"));
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_body_fallback_chain() {
        let full = sample(Some("full text"));
        assert_eq!(full.body(), "full text");

        let summary_only = sample(None).with_summary("short take");
        assert_eq!(summary_only.body(), "short take");

        let bare = sample(None);
        assert_eq!(bare.body(), "");
    }

    #[test]
    fn test_fingerprint_normalizes_title_case() {
        assert_eq!(
            fingerprint_of("Apple Beats Estimates", "https://x/a"),
            fingerprint_of("apple beats estimates", "https://x/a")
        );
        assert_ne!(
            fingerprint_of("Apple Beats Estimates", "https://x/a"),
            fingerprint_of("Apple Beats Estimates", "https://x/b")
        );
    }
}
