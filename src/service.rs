//! Application wiring: configuration → embedder → vector store → chat model
//! → chat clients.
//!
//! One [`RagService`] is built at startup and shared (behind an `Arc`) by the
//! HTTP handlers and CLI commands. It owns no per-request state; everything
//! a request needs travels in that request's prompt and advisor context.

use std::sync::Arc;

use anyhow::{bail, Result};
use rag_advisor_core::advisor::{QuestionAnswerAdvisor, FILTER_EXPRESSION_KEY};
use rag_advisor_core::chat::{ChatModel, ContentStream};
use rag_advisor_core::client::{CallResponse, ChatClient, PromptSpec};
use rag_advisor_core::embedding::EmbeddingModel;
use rag_advisor_core::store::memory::InMemoryVectorStore;
use rag_advisor_core::store::VectorStore;
use rag_advisor_core::tenant::{TenantScope, CONVERSATION_ID_KEY, USER_ID_KEY};

use crate::chat_model::create_chat_model;
use crate::config::Config;
use crate::embedding::create_embedding_model;
use crate::ingest::DocumentService;
use crate::models::ModelCatalog;
use crate::sqlite_store::SqliteVectorStore;

pub struct RagService {
    config: Config,
    store: Arc<dyn VectorStore>,
    documents: DocumentService,
    chat_enabled: bool,
    /// Chat client with the tenant-scoped retrieval advisor.
    rag_client: ChatClient,
    /// Chat client without advisors.
    plain_client: ChatClient,
}

impl RagService {
    /// Build every collaborator named in `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedding_model(&config.embedding)?;
        let store = open_store(config, embedder).await?;
        let chat = create_chat_model(&config.chat)?;
        Self::new(config.clone(), store, chat)
    }

    /// Wire pre-built collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn VectorStore>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let documents = DocumentService::from_config(&config, store.clone())?;

        let advisor = QuestionAnswerAdvisor::tenant_scoped(store.clone())
            .with_top_k(config.retrieval.top_k)
            .with_similarity_threshold(config.retrieval.similarity_threshold);

        let mut rag_builder = ChatClient::builder(chat.clone()).default_advisor(Arc::new(advisor));
        let mut plain_builder = ChatClient::builder(chat);
        if let Some(system) = &config.chat.system_prompt {
            rag_builder = rag_builder.default_system(system.clone());
            plain_builder = plain_builder.default_system(system.clone());
        }

        Ok(Self {
            chat_enabled: config.chat.is_enabled(),
            store,
            documents,
            rag_client: rag_builder.build(),
            plain_client: plain_builder.build(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn documents(&self) -> &DocumentService {
        &self.documents
    }

    pub fn chat_enabled(&self) -> bool {
        self.chat_enabled
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.config.embedding.is_enabled()
    }

    /// Retrieval-augmented answer scoped to `scope`.
    pub async fn ask(
        &self,
        query: &str,
        scope: &TenantScope,
        filter: Option<&str>,
    ) -> Result<CallResponse> {
        self.ensure_chat()?;
        self.rag_prompt(query, scope, filter).call().await
    }

    pub async fn ask_stream(
        &self,
        query: &str,
        scope: &TenantScope,
        filter: Option<&str>,
    ) -> Result<ContentStream> {
        self.ensure_chat()?;
        self.rag_prompt(query, scope, filter).stream().await
    }

    /// Ask the retrieval-augmented client for a [`ModelCatalog`].
    pub async fn models(&self, message: &str) -> Result<ModelCatalog> {
        self.ensure_chat()?;
        self.rag_client.prompt().user(message).entity::<ModelCatalog>().await
    }

    /// Plain completion, no retrieval.
    pub async fn complete(&self, message: &str) -> Result<CallResponse> {
        self.ensure_chat()?;
        self.plain_client.prompt().user(message).call().await
    }

    pub async fn complete_stream(&self, message: &str) -> Result<ContentStream> {
        self.ensure_chat()?;
        self.plain_client.prompt().user(message).stream().await
    }

    /// Ingest every `[ingest].startup` locator without a tenant scope.
    /// Failures are logged and do not stop the remaining locators.
    pub async fn ingest_startup(&self) -> usize {
        let mut ingested = 0;
        for locator in &self.config.ingest.startup {
            match self.documents.save(locator, &TenantScope::unscoped()).await {
                Ok(outcome) => {
                    tracing::info!(locator = %locator, outcome = ?outcome, "startup ingestion");
                    ingested += 1;
                }
                Err(e) => {
                    tracing::error!(locator = %locator, error = %e, "startup ingestion failed");
                }
            }
        }
        ingested
    }

    fn rag_prompt(&self, query: &str, scope: &TenantScope, filter: Option<&str>) -> PromptSpec<'_> {
        let mut prompt = self.rag_client.prompt().user(query);
        if let Some(user_id) = scope.user_id() {
            prompt = prompt.user_metadata(USER_ID_KEY, user_id);
        }
        if let Some(conversation_id) = scope.conversation_id() {
            prompt = prompt.user_metadata(CONVERSATION_ID_KEY, conversation_id);
        }
        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            prompt = prompt.context(FILTER_EXPRESSION_KEY, filter);
        }
        prompt
    }

    fn ensure_chat(&self) -> Result<()> {
        if !self.chat_enabled {
            bail!("Chat is disabled. Set [chat] provider in config.");
        }
        Ok(())
    }
}

/// Open the `[store].backend` vector store.
pub async fn open_store(
    config: &Config,
    embedder: Arc<dyn EmbeddingModel>,
) -> Result<Arc<dyn VectorStore>> {
    match config.store.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorStore::open(config, embedder).await?)),
        "memory" => Ok(Arc::new(InMemoryVectorStore::new(embedder))),
        other => bail!("Unknown store backend: {}", other),
    }
}
