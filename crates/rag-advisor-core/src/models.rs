//! Core data models shared by the ingestion and retrieval paths.

use serde::{Deserialize, Serialize};

/// Chunk metadata: string keys to arbitrary JSON values.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding the original resource filename.
pub const META_SOURCE: &str = "source";
/// Metadata key holding the zero-based position of a chunk in its document.
pub const META_CHUNK_INDEX: &str = "chunk_index";
/// Metadata key holding the MIME type the text was extracted from.
pub const META_CONTENT_TYPE: &str = "content_type";

/// A stored or retrieved chunk record.
///
/// `id` is derived from the document identity (see [`crate::identity`]),
/// never random, so that re-ingestion is idempotent. `score` is only set on
/// records returned from a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Returns a metadata value if it is a JSON string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}
