//! Document ingestion orchestration.
//!
//! Coordinates one ingestion request: resolve the locator → compute the
//! document id → existence check → extract text → split → tag with tenant
//! metadata → write. The bytes are fetched once and used for both the id and
//! the extraction.
//!
//! Nothing here retries. A missing source is reported to the caller as
//! [`IngestError::SourceNotFound`]; a duplicate on write is reported as
//! [`IngestOutcome::AlreadyPresent`].

use std::sync::Arc;

use anyhow::Result;
use rag_advisor_core::chunk::TokenTextSplitter;
use rag_advisor_core::identity::{compute_doc_id, DocId};
use rag_advisor_core::ingest::{
    document_exists, tag_chunks, write_chunks, DedupStrategy, IngestOutcome, DEFAULT_DEDUP_TOP_K,
};
use rag_advisor_core::models::Document;
use rag_advisor_core::store::{StoreError, VectorStore, DEFAULT_TOP_K};
use rag_advisor_core::tenant::TenantScope;
use thiserror::Error;

use crate::config::Config;
use crate::extract::{detect_content_type, extract, ExtractError};
use crate::search::{search_documents, SearchError, SearchOptions};
use crate::source::{Resource, SourceError, SourceResolver};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("document source not found: {0}")]
    SourceNotFound(String),
    #[error(transparent)]
    Source(SourceError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

impl From<SourceError> for IngestError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(locator) => IngestError::SourceNotFound(locator),
            other => IngestError::Source(other),
        }
    }
}

pub struct DocumentService {
    store: Arc<dyn VectorStore>,
    resolver: SourceResolver,
    splitter: TokenTextSplitter,
    dedup: DedupStrategy,
    dedup_top_k: usize,
    similarity_threshold: f64,
    top_k: usize,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        resolver: SourceResolver,
        splitter: TokenTextSplitter,
    ) -> Self {
        Self {
            store,
            resolver,
            splitter,
            dedup: DedupStrategy::default(),
            dedup_top_k: DEFAULT_DEDUP_TOP_K,
            similarity_threshold: 0.0,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Build from config. Raw paths follow `[ingest].allow_local_paths`.
    pub fn from_config(config: &Config, store: Arc<dyn VectorStore>) -> Result<Self> {
        let resolver =
            SourceResolver::new(&config.ingest.resource_dir, config.ingest.fetch_timeout_secs)?
                .with_local_paths(config.ingest.allow_local_paths);
        Ok(Self::new(store, resolver, TokenTextSplitter::new(config.chunking.clone()))
            .with_dedup(config.store.dedup, config.store.dedup_top_k)
            .with_similarity_threshold(config.retrieval.similarity_threshold)
            .with_top_k(config.retrieval.top_k))
    }

    pub fn with_local_paths(mut self, allow: bool) -> Self {
        self.resolver = self.resolver.with_local_paths(allow);
        self
    }

    /// Result count used by [`DocumentService::search`] when none is given.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_dedup(mut self, strategy: DedupStrategy, top_k: usize) -> Self {
        self.dedup = strategy;
        self.dedup_top_k = top_k;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Ingest the document at `locator` under `scope`.
    pub async fn save(
        &self,
        locator: &str,
        scope: &TenantScope,
    ) -> Result<IngestOutcome, IngestError> {
        let resource = self.fetch(locator).await?;
        self.save_resource(&resource, scope).await
    }

    /// Ingest already-fetched bytes.
    pub async fn save_resource(
        &self,
        resource: &Resource,
        scope: &TenantScope,
    ) -> Result<IngestOutcome, IngestError> {
        let doc_id = compute_doc_id(&resource.bytes, scope);

        if document_exists(self.store.as_ref(), &doc_id, self.dedup, self.dedup_top_k).await? {
            tracing::info!(
                %doc_id,
                source = %resource.filename,
                "document already ingested, skipping"
            );
            return Ok(IngestOutcome::Skipped { doc_id });
        }

        let content_type = detect_content_type(&resource.filename, &resource.bytes);
        let extracted = extract(&resource.bytes, content_type)?;
        let chunks = self.splitter.split(&extracted.text);
        tracing::debug!(
            %doc_id,
            content_type,
            chars = extracted.text.len(),
            chunks = chunks.len(),
            "document split"
        );

        let records = tag_chunks(
            &doc_id,
            chunks,
            &extracted.metadata,
            &resource.filename,
            scope,
            content_type,
        );
        Ok(write_chunks(self.store.as_ref(), &doc_id, &records).await?)
    }

    /// The id `save` would assign, without writing anything.
    pub async fn generate_doc_id(
        &self,
        locator: &str,
        scope: &TenantScope,
    ) -> Result<DocId, IngestError> {
        let resource = self.fetch(locator).await?;
        Ok(compute_doc_id(&resource.bytes, scope))
    }

    pub async fn search(
        &self,
        query: &str,
        scope: &TenantScope,
        top_k: Option<usize>,
    ) -> Result<Vec<Document>, IngestError> {
        let options = SearchOptions {
            top_k: top_k.unwrap_or(self.top_k),
            similarity_threshold: self.similarity_threshold,
            raw_filter: None,
        };
        Ok(search_documents(self.store.as_ref(), query, scope, options).await?)
    }

    async fn fetch(&self, locator: &str) -> Result<Resource, IngestError> {
        self.resolver.fetch(locator).await.map_err(|e| {
            match &e {
                SourceError::NotFound(_) => {
                    tracing::warn!(locator, "document source not found")
                }
                other => tracing::warn!(locator, error = %other, "failed to fetch document source"),
            }
            IngestError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rag_advisor_core::embedding::EmbeddingModel;
    use rag_advisor_core::store::memory::InMemoryVectorStore;

    struct Letters;

    #[async_trait]
    impl EmbeddingModel for Letters {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let count =
                        |c: char| t.chars().filter(|x| x.eq_ignore_ascii_case(&c)).count() as f32;
                    vec![count('a') + 1.0, count('e') + 1.0, count('o') + 1.0]
                })
                .collect())
        }
    }

    fn service(dir: &std::path::Path) -> DocumentService {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(Letters)));
        DocumentService::new(
            store,
            SourceResolver::new(dir, 5).unwrap(),
            TokenTextSplitter::new(Default::default()),
        )
    }

    #[tokio::test]
    async fn save_then_save_again_skips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "Alpha notes about the project.").unwrap();
        let svc = service(dir.path());
        let scope = TenantScope::new(Some("u1".into()), Some("c1".into()));

        let first = svc.save("classpath:/notes.txt", &scope).await.unwrap();
        assert!(matches!(first, IngestOutcome::Stored { chunks: 1, .. }));

        let second = svc.save("classpath:/notes.txt", &scope).await.unwrap();
        assert_eq!(second, IngestOutcome::Skipped { doc_id: first.doc_id().clone() });
        assert_eq!(svc.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let err = svc
            .save("classpath:/absent.pdf", &TenantScope::unscoped())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SourceNotFound(_)));

        let err = svc
            .generate_doc_id("classpath:/absent.pdf", &TenantScope::unscoped())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn generate_doc_id_matches_saved_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Heading\n\nSome text here.").unwrap();
        let svc = service(dir.path());
        let scope = TenantScope::new(Some("u".into()), None);

        let id = svc.generate_doc_id("classpath:/a.md", &scope).await.unwrap();
        let outcome = svc.save("classpath:/a.md", &scope).await.unwrap();
        assert_eq!(outcome.doc_id(), &id);
        assert_eq!(svc.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn whitespace_document_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blank.txt"), "   \n\n  ").unwrap();
        let svc = service(dir.path());
        let outcome = svc
            .save("classpath:/blank.txt", &TenantScope::unscoped())
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Empty { .. }));
        assert_eq!(svc.store().count().await.unwrap(), 0);
    }

    async fn seed_six(svc: &DocumentService) {
        for i in 0..6 {
            let text = format!("Document number {} about oats and apples.", i);
            let resource = Resource {
                locator: format!("mem:{}", i),
                filename: format!("doc{}.txt", i),
                bytes: text.into_bytes(),
            };
            svc.save_resource(&resource, &TenantScope::unscoped()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn search_falls_back_to_configured_top_k() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).with_top_k(2);
        seed_six(&svc).await;

        let scope = TenantScope::unscoped();
        assert_eq!(svc.search("apples", &scope, None).await.unwrap().len(), 2);
        assert_eq!(svc.search("apples", &scope, Some(5)).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn from_config_applies_retrieval_and_ingest_settings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Some text.").unwrap();
        let config = crate::config::parse_config(&format!(
            "[db]\npath = \"unused.sqlite\"\n[retrieval]\ntop_k = 3\n[ingest]\nresource_dir = \"{}\"\n",
            dir.path().display()
        ))
        .unwrap();
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(Letters)));
        let svc = DocumentService::from_config(&config, store).unwrap();
        seed_six(&svc).await;

        let hits = svc.search("apples", &TenantScope::unscoped(), None).await.unwrap();
        assert_eq!(hits.len(), 3);

        let raw = dir.path().join("a.txt");
        let err = svc
            .save(raw.to_str().unwrap(), &TenantScope::unscoped())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Source(SourceError::Forbidden(_))));
        assert!(svc.save("classpath:/a.txt", &TenantScope::unscoped()).await.is_ok());
    }
}
