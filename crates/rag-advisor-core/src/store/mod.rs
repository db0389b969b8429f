//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only storage interface the ingestion and
//! retrieval paths use. It is deliberately small: add records, run a
//! filtered similarity search, and optionally look a record up by id.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`add`](VectorStore::add) | Embed and persist records; existing ids are an error |
//! | [`similarity_search`](VectorStore::similarity_search) | Nearest records to a query text |
//! | [`get`](VectorStore::get) | Exact lookup by record id |
//! | [`count`](VectorStore::count) | Number of stored records |
//!
//! Implementations must be `Send + Sync` so one instance can be shared by
//! every request handler.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::embedding::cosine_similarity;
use crate::filter::Expression;
use crate::models::Document;

/// Default number of results for a similarity search.
pub const DEFAULT_TOP_K: usize = 4;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with this id is already stored.
    #[error("duplicate record id '{0}'")]
    Duplicate(String),
    #[error("{0} is not supported by this vector store")]
    Unsupported(&'static str),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether this failure is a duplicate-key condition.
    ///
    /// Backends that cannot map their native errors to
    /// [`StoreError::Duplicate`] are recognised by message.
    pub fn is_duplicate(&self) -> bool {
        match self {
            StoreError::Duplicate(_) => true,
            StoreError::Backend(e) => message_indicates_duplicate(&format!("{:#}", e)),
            StoreError::Unsupported(_) => false,
        }
    }
}

pub fn message_indicates_duplicate(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("duplicate") || lower.contains("unique constraint")
}

/// Parameters of a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    /// Results scoring below this cosine similarity are dropped.
    pub similarity_threshold: f64,
    pub filter: Option<Expression>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: DEFAULT_TOP_K,
            similarity_threshold: 0.0,
            filter: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_filter(mut self, filter: Option<Expression>) -> Self {
        self.filter = filter;
        self
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and persist `documents` in order.
    ///
    /// Records are written one at a time. If one fails, the records before
    /// it stay written and the error is returned.
    async fn add(&self, documents: &[Document]) -> Result<(), StoreError>;

    /// Return up to `top_k` records ordered by descending similarity, each
    /// with `score` set.
    async fn similarity_search(&self, request: &SearchRequest)
        -> Result<Vec<Document>, StoreError>;

    async fn get(&self, _id: &str) -> Result<Option<Document>, StoreError> {
        Err(StoreError::Unsupported("point lookup"))
    }

    /// Whether [`get`](VectorStore::get) is implemented.
    fn supports_point_lookup(&self) -> bool {
        false
    }

    async fn count(&self) -> Result<usize, StoreError>;
}

/// Brute-force ranking shared by the bundled stores.
///
/// Applies the request filter to each candidate's metadata, scores the rest
/// by cosine similarity, drops scores under the threshold and keeps the best
/// `top_k`. Ties keep candidate order.
pub fn rank<'a, I>(query_vec: &[f32], candidates: I, request: &SearchRequest) -> Vec<Document>
where
    I: IntoIterator<Item = (&'a Document, &'a [f32])>,
{
    if request.top_k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(f64, &Document)> = candidates
        .into_iter()
        .filter(|(doc, _)| {
            request
                .filter
                .as_ref()
                .map_or(true, |f| f.matches(&doc.metadata))
        })
        .map(|(doc, vector)| (f64::from(cosine_similarity(query_vec, vector)), doc))
        .filter(|(score, _)| *score >= request.similarity_threshold)
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(request.top_k);

    scored
        .into_iter()
        .map(|(score, doc)| doc.clone().with_score(score))
        .collect()
}
