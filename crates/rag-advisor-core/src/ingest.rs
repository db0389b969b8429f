//! Storage-side ingestion steps: existence check, chunk tagging and the
//! duplicate-tolerant write.
//!
//! Source resolution and text extraction need I/O and live in the app
//! crate. The steps here only talk to a [`VectorStore`].

use serde::{Deserialize, Serialize};

use crate::identity::{chunk_id, parent_id, DocId};
use crate::models::{Document, Metadata, META_CHUNK_INDEX, META_CONTENT_TYPE, META_SOURCE};
use crate::store::{SearchRequest, StoreError, VectorStore};
use crate::tenant::TenantScope;

/// Number of neighbours inspected by the similarity existence check.
pub const DEFAULT_DEDUP_TOP_K: usize = 5;

/// How [`document_exists`] decides whether a document is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// Point lookup when the store supports it, otherwise similarity.
    #[default]
    Auto,
    /// Search with the document id as query text and look for a result
    /// whose parent id equals it. Can miss a stored document whose chunks
    /// are not among the nearest neighbours of its own id string.
    Similarity,
    /// Exact lookup of the first chunk id.
    Lookup,
}

/// Result of one ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// New chunks were written.
    Stored { doc_id: DocId, chunks: usize },
    /// The existence check found the document; nothing was written.
    Skipped { doc_id: DocId },
    /// The existence check missed, but the write hit existing ids.
    AlreadyPresent { doc_id: DocId },
    /// Extraction produced no text worth embedding.
    Empty { doc_id: DocId },
}

impl IngestOutcome {
    pub fn doc_id(&self) -> &DocId {
        match self {
            IngestOutcome::Stored { doc_id, .. }
            | IngestOutcome::Skipped { doc_id }
            | IngestOutcome::AlreadyPresent { doc_id }
            | IngestOutcome::Empty { doc_id } => doc_id,
        }
    }
}

pub async fn document_exists(
    store: &dyn VectorStore,
    doc_id: &DocId,
    strategy: DedupStrategy,
    top_k: usize,
) -> Result<bool, StoreError> {
    let lookup = match strategy {
        DedupStrategy::Auto => store.supports_point_lookup(),
        DedupStrategy::Similarity => false,
        DedupStrategy::Lookup => true,
    };

    if lookup {
        return Ok(store.get(doc_id.as_str()).await?.is_some());
    }

    let request = SearchRequest::new(doc_id.as_str()).with_top_k(top_k);
    let neighbours = store.similarity_search(&request).await?;
    Ok(neighbours
        .iter()
        .any(|d| parent_id(&d.id) == doc_id.as_str()))
}

/// Turn split text into chunk records carrying identity and tenant metadata.
///
/// `base` holds extraction metadata; the `source`, tenant, `chunk_index`
/// and `content_type` keys always overwrite it.
pub fn tag_chunks(
    doc_id: &DocId,
    chunks: Vec<String>,
    base: &Metadata,
    source: &str,
    scope: &TenantScope,
    content_type: &str,
) -> Vec<Document> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(ordinal, text)| {
            let mut metadata = base.clone();
            metadata.insert(META_SOURCE.to_string(), source.into());
            scope.write_metadata(&mut metadata);
            metadata.insert(META_CHUNK_INDEX.to_string(), ordinal.into());
            metadata.insert(META_CONTENT_TYPE.to_string(), content_type.into());
            Document::new(chunk_id(doc_id, ordinal), text, metadata)
        })
        .collect()
}

/// Write `records` in one `add` call.
///
/// A duplicate-key failure means the document is already present and is
/// not an error. Any other failure is logged and returned.
pub async fn write_chunks(
    store: &dyn VectorStore,
    doc_id: &DocId,
    records: &[Document],
) -> Result<IngestOutcome, StoreError> {
    let doc_id = doc_id.clone();
    if records.is_empty() {
        tracing::info!(%doc_id, "document produced no chunks; nothing written");
        return Ok(IngestOutcome::Empty { doc_id });
    }

    match store.add(records).await {
        Ok(()) => {
            tracing::info!(%doc_id, chunks = records.len(), "document stored");
            Ok(IngestOutcome::Stored {
                doc_id,
                chunks: records.len(),
            })
        }
        Err(e) if e.is_duplicate() => {
            tracing::info!(%doc_id, error = %e, "document already present (duplicate on write)");
            Ok(IngestOutcome::AlreadyPresent { doc_id })
        }
        Err(e) => {
            tracing::error!(%doc_id, error = %e, "failed to store document chunks");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingModel;
    use crate::identity::compute_doc_id;
    use crate::store::memory::InMemoryVectorStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Constant;

    #[async_trait]
    impl EmbeddingModel for Constant {
        fn model_name(&self) -> &str {
            "constant"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    fn scope() -> TenantScope {
        TenantScope::new(Some("u1".into()), Some("c1".into()))
    }

    #[test]
    fn tagging_assigns_ids_and_metadata() {
        let doc_id = compute_doc_id(b"pdf", &scope());
        let mut base = Metadata::new();
        base.insert("page_count".into(), json!(2));
        base.insert("source".into(), json!("overwritten"));

        let records = tag_chunks(
            &doc_id,
            vec!["one".into(), "two".into(), "three".into()],
            &base,
            "report.pdf",
            &scope(),
            "application/pdf",
        );

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                doc_id.to_string(),
                format!("{}_1", doc_id),
                format!("{}_2", doc_id)
            ]
        );
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.metadata["source"], json!("report.pdf"));
            assert_eq!(record.metadata["userId"], json!("u1"));
            assert_eq!(record.metadata["conversationId"], json!("c1"));
            assert_eq!(record.metadata["chunk_index"], json!(i));
            assert_eq!(record.metadata["content_type"], json!("application/pdf"));
            assert_eq!(record.metadata["page_count"], json!(2));
        }
    }

    #[test]
    fn unscoped_chunks_carry_null_tenant_keys() {
        let doc_id = compute_doc_id(b"x", &TenantScope::unscoped());
        let records = tag_chunks(
            &doc_id,
            vec!["text".into()],
            &Metadata::new(),
            "a.txt",
            &TenantScope::unscoped(),
            "text/plain",
        );
        assert!(records[0].metadata["userId"].is_null());
        assert!(records[0].metadata["conversationId"].is_null());
    }

    #[tokio::test]
    async fn existence_by_lookup_and_similarity() {
        let store = InMemoryVectorStore::new(Arc::new(Constant));
        let doc_id = compute_doc_id(b"doc", &scope());
        let other = compute_doc_id(b"other", &scope());

        for strategy in [DedupStrategy::Auto, DedupStrategy::Lookup, DedupStrategy::Similarity] {
            assert!(!document_exists(&store, &doc_id, strategy, 5).await.unwrap());
        }

        let chunks = vec!["a".into(), "b".into()];
        let records = tag_chunks(&doc_id, chunks, &Metadata::new(), "d", &scope(), "text/plain");
        store.add(&records).await.unwrap();

        for strategy in [DedupStrategy::Auto, DedupStrategy::Lookup, DedupStrategy::Similarity] {
            assert!(document_exists(&store, &doc_id, strategy, 5).await.unwrap());
            assert!(!document_exists(&store, &other, strategy, 5).await.unwrap());
        }
    }

    #[tokio::test]
    async fn duplicate_write_is_benign() {
        let store = InMemoryVectorStore::new(Arc::new(Constant));
        let doc_id = compute_doc_id(b"doc", &scope());
        let chunks = vec!["a".into()];
        let records = tag_chunks(&doc_id, chunks, &Metadata::new(), "d", &scope(), "text/plain");

        let first = write_chunks(&store, &doc_id, &records).await.unwrap();
        assert_eq!(first, IngestOutcome::Stored { doc_id: doc_id.clone(), chunks: 1 });
        let second = write_chunks(&store, &doc_id, &records).await.unwrap();
        assert_eq!(second, IngestOutcome::AlreadyPresent { doc_id: doc_id.clone() });
        assert_eq!(store.count().await.unwrap(), 1);

        let empty = write_chunks(&store, &doc_id, &[]).await.unwrap();
        assert_eq!(empty, IngestOutcome::Empty { doc_id });
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = IngestOutcome::Stored {
            doc_id: DocId::from("abc".to_string()),
            chunks: 3,
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"status": "stored", "doc_id": "abc", "chunks": 3})
        );
    }
}
