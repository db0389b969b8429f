//! SQLite-backed [`VectorStore`].
//!
//! Each chunk is one row of `vector_store`: the chunk id as primary key,
//! its text, its metadata as JSON, and its embedding as a little-endian
//! `f32` BLOB. Similarity search is brute-force cosine over the rows whose
//! metadata passes the request filter.
//!
//! Top-level string equalities of the filter (the tenant predicates) are
//! pushed into the SQL `WHERE` clause; the full expression is then applied
//! to the returned rows.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rag_advisor_core::embedding::{blob_to_vec, vec_to_blob, EmbeddingModel};
use rag_advisor_core::filter::{Expression, Op, Value};
use rag_advisor_core::models::{Document, Metadata};
use rag_advisor_core::store::{rank, SearchRequest, StoreError, VectorStore};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingModel>,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self { pool, embedder }
    }

    /// Connect to `[db].path` and make sure the schema exists.
    pub async fn open(config: &Config, embedder: Arc<dyn EmbeddingModel>) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool, embedder))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Result<(Document, Vec<f32>)> {
    let id: String = row.try_get("id")?;
    let content: String = row.try_get("content")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let embedding: Vec<u8> = row.try_get("embedding")?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("corrupt metadata_json for record {}", id))?;
    Ok((Document::new(id, content, metadata), blob_to_vec(&embedding)))
}

/// `key == 'string'` conjuncts at the top of `expr`.
fn pushdown_equalities(expr: &Expression, out: &mut Vec<(String, String)>) {
    match expr {
        Expression::And(l, r) => {
            pushdown_equalities(l, out);
            pushdown_equalities(r, out);
        }
        Expression::Compare {
            key,
            op: Op::Eq,
            value: Value::Str(s),
        } if key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
            out.push((key.clone(), s.clone()));
        }
        _ => {}
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    StoreError::Backend(anyhow!(e))
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
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

        let now = chrono::Utc::now().timestamp();
        for (doc, vector) in documents.iter().zip(vectors) {
            let metadata_json =
                serde_json::to_string(&doc.metadata).map_err(|e| StoreError::Backend(e.into()))?;
            let result = sqlx::query(
                "INSERT INTO vector_store (id, content, metadata_json, embedding, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(&doc.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&vector))
            .bind(now)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {}
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    return Err(StoreError::Duplicate(doc.id.clone()));
                }
                Err(e) => return Err(map_sqlx(e)),
            }
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<Document>, StoreError> {
        let query_vec = self.embedder.embed_one(&request.query).await?;

        let mut equalities = Vec::new();
        if let Some(filter) = &request.filter {
            pushdown_equalities(filter, &mut equalities);
        }
        let mut sql =
            String::from("SELECT id, content, metadata_json, embedding FROM vector_store");
        for (i, (key, _)) in equalities.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("json_extract(metadata_json, '$.{}') = ?", key));
        }
        sql.push_str(" ORDER BY created_at, rowid");

        let mut query = sqlx::query(&sql);
        for (_, value) in &equalities {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx)?;

        let candidates = rows
            .iter()
            .map(row_to_document)
            .collect::<Result<Vec<_>>>()?;
        Ok(rank(
            &query_vec,
            candidates.iter().map(|(d, v)| (d, v.as_slice())),
            request,
        ))
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            "SELECT id, content, metadata_json, embedding FROM vector_store WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        match row {
            Some(row) => Ok(Some(row_to_document(&row)?.0)),
            None => Ok(None),
        }
    }

    fn supports_point_lookup(&self) -> bool {
        true
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_store")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(count as usize)
    }
}
