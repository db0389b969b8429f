//! In-memory [`VectorStore`] for tests and the `memory` backend.
//!
//! Records and their vectors live behind a `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::embedding::EmbeddingModel;
use crate::models::Document;

use super::{rank, SearchRequest, StoreError, VectorStore};

struct Entry {
    doc: Document,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

pub struct InMemoryVectorStore {
    embedder: Arc<dyn EmbeddingModel>,
    inner: RwLock<Inner>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            embedder,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Snapshot of every stored record, in insertion order.
    pub fn documents(&self) -> Result<Vec<Document>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.entries.iter().map(|e| e.doc.clone()).collect())
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend(anyhow!("in-memory vector store lock poisoned"))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, documents: &[Document]) -> Result<(), StoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != documents.len() {
            return Err(StoreError::Backend(anyhow!(
                "embedding model returned {} vectors for {} documents",
                vectors.len(),
                documents.len()
            )));
        }

        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        for (doc, vector) in documents.iter().zip(vectors) {
            if inner.index.contains_key(&doc.id) {
                return Err(StoreError::Duplicate(doc.id.clone()));
            }
            let position = inner.entries.len();
            inner.index.insert(doc.id.clone(), position);
            let mut doc = doc.clone();
            doc.score = None;
            inner.entries.push(Entry { doc, vector });
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<Document>, StoreError> {
        let query_vec = self.embedder.embed_one(&request.query).await?;
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(rank(
            &query_vec,
            inner.entries.iter().map(|e| (&e.doc, e.vector.as_slice())),
            request,
        ))
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .index
            .get(id)
            .map(|&position| inner.entries[position].doc.clone()))
    }

    fn supports_point_lookup(&self) -> bool {
        true
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Expression;
    use crate::models::Metadata;
    use anyhow::Result;
    use serde_json::json;

    /// Embeds a text as letter frequencies over `a..=e`.
    struct Letters;

    #[async_trait]
    impl EmbeddingModel for Letters {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            5
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; 5];
                    for c in t.chars() {
                        if ('a'..='e').contains(&c) {
                            v[(c as u8 - b'a') as usize] += 1.0;
                        }
                    }
                    v
                })
                .collect())
        }
    }

    fn store() -> InMemoryVectorStore {
        InMemoryVectorStore::new(Arc::new(Letters))
    }

    fn doc(id: &str, text: &str, user: &str) -> Document {
        let mut metadata = Metadata::new();
        metadata.insert("userId".into(), json!(user));
        Document::new(id, text, metadata)
    }

    #[tokio::test]
    async fn add_then_get_and_count() {
        let store = store();
        store
            .add(&[doc("x", "aaa", "u1"), doc("x_1", "bbb", "u1")])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.get("x_1").await.unwrap().unwrap().text, "bbb");
        assert!(store.get("y").await.unwrap().is_none());
        assert!(store.supports_point_lookup());
    }

    #[tokio::test]
    async fn duplicate_id_fails_after_earlier_records_are_written() {
        let store = store();
        store.add(&[doc("x", "aaa", "u1")]).await.unwrap();
        let err = store
            .add(&[doc("new", "ccc", "u1"), doc("x", "aaa", "u1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(ref id) if id == "x"));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn search_is_ranked_and_filtered() {
        let store = store();
        store
            .add(&[
                doc("1", "aaaa", "u1"),
                doc("2", "aabb", "u1"),
                doc("3", "aaaa", "u2"),
                doc("4", "dddd", "u1"),
            ])
            .await
            .unwrap();

        let request = SearchRequest::new("aaa")
            .with_top_k(3)
            .with_filter(Some(Expression::eq("userId", "u1")));
        let results = store.similarity_search(&request).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "4"]);
        assert!((results[0].score.unwrap() - 1.0).abs() < 1e-6);
        assert!(results.iter().all(|d| d.metadata_str("userId") == Some("u1")));
    }

    #[tokio::test]
    async fn empty_add_is_a_no_op() {
        let store = store();
        store.add(&[]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.documents().unwrap().is_empty());
    }
}
