//! Request and response types of the HTTP API, plus the structured answer
//! type decoded by `/rag/models`.

use rag_advisor_core::models::Document;
use rag_advisor_core::TenantScope;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Prompt used by `/rag/models` when no `message` is given.
pub const DEFAULT_MODELS_MESSAGE: &str =
    "Give me a list of all the models from OpenAI along with their context window.";
/// Prompt used by the `/chat/*` endpoints when no `message` is given.
pub const DEFAULT_CHAT_MESSAGE: &str = "Hi, tell me an interesting fact about Rust";

/// Structured answer of `/rag/models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelCatalog {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelInfo {
    /// Model name as published by the provider.
    pub name: String,
    /// Context window size in tokens.
    pub context_window: u64,
}

fn scope_of(user_id: &Option<String>, conversation_id: &Option<String>) -> TenantScope {
    TenantScope::new(user_id.clone(), conversation_id.clone())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagChatParams {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Extra filter expression conjoined with the tenant filter.
    #[serde(default)]
    pub filter: Option<String>,
}

impl RagChatParams {
    pub fn scope(&self) -> TenantScope {
        scope_of(&self.user_id, &self.conversation_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageParams {
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `POST /rag/documents`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub url: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl IngestRequest {
    pub fn scope(&self) -> TenantScope {
        scope_of(&self.user_id, &self.conversation_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocIdParams {
    pub url: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl DocIdParams {
    pub fn scope(&self) -> TenantScope {
        scope_of(&self.user_id, &self.conversation_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filter: Option<String>,
}

impl SearchParams {
    pub fn scope(&self) -> TenantScope {
        scope_of(&self.user_id, &self.conversation_id)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocIdResponse {
    pub doc_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<Document>,
}
