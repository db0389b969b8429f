//! Tenant-filtered retrieval without a model call.
//!
//! Builds the tenant filter for the request scope, conjoins an optional raw
//! filter expression, and runs a single similarity search. Results come back
//! in the store's similarity order; nothing is reranked.

use rag_advisor_core::filter::FilterParseError;
use rag_advisor_core::models::Document;
use rag_advisor_core::store::{SearchRequest, StoreError, VectorStore};
use rag_advisor_core::tenant::{build_filter_with, TenantScope};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid filter expression: {0}")]
    Filter(#[from] FilterParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Options carried alongside the query.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions<'a> {
    pub top_k: usize,
    pub similarity_threshold: f64,
    pub raw_filter: Option<&'a str>,
}

pub async fn search_documents(
    store: &dyn VectorStore,
    query: &str,
    scope: &TenantScope,
    options: SearchOptions<'_>,
) -> Result<Vec<Document>, SearchError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let filter = build_filter_with(scope, options.raw_filter)?;
    if filter.is_none() {
        tracing::warn!("search request carries no tenant scope; results are unrestricted");
    }
    if let Some(expr) = &filter {
        tracing::debug!(filter = %expr, "search filter");
    }

    let request = SearchRequest::new(query)
        .with_top_k(options.top_k.max(1))
        .with_similarity_threshold(options.similarity_threshold)
        .with_filter(filter);

    let results = store.similarity_search(&request).await?;
    tracing::debug!(results = results.len(), top_k = request.top_k, "search complete");
    Ok(results)
}

/// Print search results the way the CLI shows them.
pub fn print_results(results: &[Document]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, doc) in results.iter().enumerate() {
        let score = doc.score.unwrap_or(0.0);
        let source = doc.metadata_str("source").unwrap_or("-");
        println!("{}. [{:.3}] {} ({})", i + 1, score, source, doc.id);
        let snippet: String = doc.text.chars().take(200).collect();
        println!("   {}", snippet.replace('\n', " "));
        println!();
    }
}
