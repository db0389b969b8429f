//! Request advisors and the retrieval-augmentation stage.
//!
//! A chat call flows through an ordered chain of [`Advisor`]s. Each one
//! receives the [`ChatClientRequest`] (the prompt plus a per-request
//! [`AdvisorContext`]) before the model is called and the
//! [`ChatClientResponse`] after it answers. The context is created with the
//! request and dropped with it, so concurrent requests never share state.
//!
//! [`QuestionAnswerAdvisor`] is the retrieval stage: it searches the vector
//! store with the user text and rewrites the user message with the
//! retrieved chunks. Which filter it searches with is decided by an
//! injected [`RetrievalPolicy`]:
//!
//! * [`DefaultRetrievalPolicy`] parses a raw expression from the context key
//!   [`FILTER_EXPRESSION_KEY`], if one is present.
//! * [`TenantRetrievalPolicy`] first copies the user message metadata into
//!   the context when it carries a `userId`, then builds the tenant filter
//!   and conjoins the raw expression.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::chat::{ChatResponse, Prompt};
use crate::filter::{parse, Expression};
use crate::models::Document;
use crate::store::{SearchRequest, VectorStore, DEFAULT_TOP_K};
use crate::tenant::{build_filter_with, TenantScope, CONVERSATION_ID_KEY, USER_ID_KEY};

/// Per-request key/value state shared by the advisors of one call.
pub type AdvisorContext = HashMap<String, Value>;

/// Context key holding a raw filter expression in text form.
pub const FILTER_EXPRESSION_KEY: &str = "qa_filter_expression";
/// Context (and response metadata) key holding the retrieved documents.
pub const RETRIEVED_DOCUMENTS_KEY: &str = "qa_retrieved_documents";

pub const DEFAULT_TEMPLATE: &str = "{query}

Context information is below, between the dashed lines.
---------------------
{question_answer_context}
---------------------

Answer the question above using only this context, not prior knowledge.
If the context does not contain the answer, say that you cannot answer.
";

#[derive(Debug, Clone, Default)]
pub struct ChatClientRequest {
    pub prompt: Prompt,
    pub context: AdvisorContext,
}

#[derive(Debug, Clone, Default)]
pub struct ChatClientResponse {
    pub response: ChatResponse,
    pub context: AdvisorContext,
}

#[async_trait]
pub trait Advisor: Send + Sync {
    fn name(&self) -> &str;

    async fn before(&self, request: ChatClientRequest) -> Result<ChatClientRequest>;

    fn after(&self, response: ChatClientResponse) -> Result<ChatClientResponse> {
        Ok(response)
    }
}

/// Decides how a [`QuestionAnswerAdvisor`] filters its search.
pub trait RetrievalPolicy: Send + Sync {
    /// Runs once per request, before the filter is computed.
    fn prepare(&self, _request: &mut ChatClientRequest) {}

    fn filter_expression(&self, context: &AdvisorContext) -> Result<Option<Expression>>;
}

fn raw_filter(context: &AdvisorContext) -> Option<&str> {
    context
        .get(FILTER_EXPRESSION_KEY)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetrievalPolicy;

impl RetrievalPolicy for DefaultRetrievalPolicy {
    fn filter_expression(&self, context: &AdvisorContext) -> Result<Option<Expression>> {
        raw_filter(context)
            .map(|text| parse(text).context("invalid filter expression in advisor context"))
            .transpose()
    }
}

/// Scopes retrieval to the request's `(userId, conversationId)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantRetrievalPolicy;

impl RetrievalPolicy for TenantRetrievalPolicy {
    fn prepare(&self, request: &mut ChatClientRequest) {
        let Some(message) = request.prompt.user_message() else {
            return;
        };
        if message.metadata.contains_key(USER_ID_KEY)
            || message.metadata.contains_key(CONVERSATION_ID_KEY)
        {
            for (key, value) in &message.metadata {
                request.context.insert(key.clone(), value.clone());
            }
        }
    }

    fn filter_expression(&self, context: &AdvisorContext) -> Result<Option<Expression>> {
        let scope = TenantScope::from_context(context);
        if scope.is_unscoped() {
            tracing::warn!("chat request carries no tenant scope; retrieval is unrestricted");
        }
        build_filter_with(&scope, raw_filter(context))
            .context("invalid filter expression in advisor context")
    }
}

pub struct QuestionAnswerAdvisor {
    store: Arc<dyn VectorStore>,
    top_k: usize,
    similarity_threshold: f64,
    template: String,
    policy: Arc<dyn RetrievalPolicy>,
}

impl QuestionAnswerAdvisor {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            top_k: DEFAULT_TOP_K,
            similarity_threshold: 0.0,
            template: DEFAULT_TEMPLATE.to_string(),
            policy: Arc::new(DefaultRetrievalPolicy),
        }
    }

    /// A question-answer advisor scoped by [`TenantRetrievalPolicy`].
    pub fn tenant_scoped(store: Arc<dyn VectorStore>) -> Self {
        Self::new(store).with_policy(Arc::new(TenantRetrievalPolicy))
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Prompt template with `{query}` and `{question_answer_context}`
    /// placeholders.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn RetrievalPolicy>) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Advisor for QuestionAnswerAdvisor {
    fn name(&self) -> &str {
        "question_answer"
    }

    async fn before(&self, mut request: ChatClientRequest) -> Result<ChatClientRequest> {
        self.policy.prepare(&mut request);
        let filter = self.policy.filter_expression(&request.context)?;

        let query = request.prompt.user_text().to_string();
        let search = SearchRequest::new(query.clone())
            .with_top_k(self.top_k)
            .with_similarity_threshold(self.similarity_threshold)
            .with_filter(filter);
        let documents = self
            .store
            .similarity_search(&search)
            .await
            .context("retrieval for chat request failed")?;
        tracing::debug!(retrieved = documents.len(), "question-answer retrieval");

        let context_text = documents
            .iter()
            .map(|d| d.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let augmented = render_template(
            &self.template,
            &[("query", &query), ("question_answer_context", &context_text)],
        );

        request.context.insert(
            RETRIEVED_DOCUMENTS_KEY.to_string(),
            serde_json::to_value(&documents)?,
        );
        if let Some(message) = request.prompt.user_message_mut() {
            message.content = augmented;
        }
        Ok(request)
    }

    fn after(&self, mut response: ChatClientResponse) -> Result<ChatClientResponse> {
        if let Some(docs) = response.context.get(RETRIEVED_DOCUMENTS_KEY) {
            response
                .response
                .metadata
                .insert(RETRIEVED_DOCUMENTS_KEY.to_string(), docs.clone());
        }
        Ok(response)
    }
}

/// Documents a [`QuestionAnswerAdvisor`] stored in `context`.
pub fn retrieved_documents(context: &AdvisorContext) -> Vec<Document> {
    context
        .get(RETRIEVED_DOCUMENTS_KEY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Replace `{name}` placeholders in a single left-to-right pass.
///
/// Substituted values are never rescanned, so user text that happens to
/// contain a placeholder is left alone. Unknown placeholders are kept.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Message;
    use crate::embedding::EmbeddingModel;
    use crate::models::Metadata;
    use crate::store::memory::InMemoryVectorStore;
    use serde_json::json;

    struct Constant;

    #[async_trait]
    impl EmbeddingModel for Constant {
        fn model_name(&self) -> &str {
            "constant"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 1.0]).collect())
        }
    }

    async fn seeded_store() -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(Constant)));
        let mut docs = Vec::new();
        for (id, user, conversation, text) in [
            ("a", "u1", "c1", "alpha fact"),
            ("b", "u1", "c2", "beta fact"),
            ("c", "u2", "c1", "gamma fact"),
        ] {
            let mut metadata = Metadata::new();
            metadata.insert("userId".into(), json!(user));
            metadata.insert("conversationId".into(), json!(conversation));
            docs.push(Document::new(id, text, metadata));
        }
        store.add(&docs).await.unwrap();
        store
    }

    fn request_with_metadata(text: &str, metadata: Value) -> ChatClientRequest {
        let mut message = Message::user(text);
        message.metadata = metadata.as_object().cloned().unwrap();
        ChatClientRequest {
            prompt: Prompt::new(vec![message]),
            context: AdvisorContext::new(),
        }
    }

    #[tokio::test]
    async fn tenant_policy_limits_retrieval_to_scope() {
        let advisor = QuestionAnswerAdvisor::tenant_scoped(seeded_store().await).with_top_k(10);
        let request = request_with_metadata(
            "what do we know?",
            json!({"userId": "u1", "conversationId": "c1"}),
        );
        let request = advisor.before(request).await.unwrap();

        let docs = retrieved_documents(&request.context);
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(request.context["userId"], json!("u1"));
        let content = &request.prompt.user_message().unwrap().content;
        assert!(content.starts_with("what do we know?"));
        assert!(content.contains("alpha fact"));
        assert!(!content.contains("gamma fact"));
    }

    #[tokio::test]
    async fn tenant_policy_conjoins_raw_filter() {
        let advisor = QuestionAnswerAdvisor::tenant_scoped(seeded_store().await).with_top_k(10);
        let mut request = request_with_metadata("q", json!({"userId": "u1"}));
        request
            .context
            .insert(FILTER_EXPRESSION_KEY.into(), json!("conversationId == 'c2'"));
        let request = advisor.before(request).await.unwrap();
        let ids: Vec<String> = retrieved_documents(&request.context)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn conversation_only_metadata_still_scopes() {
        let mut request = request_with_metadata("q", json!({"conversationId": "c1"}));
        TenantRetrievalPolicy.prepare(&mut request);
        assert_eq!(request.context["conversationId"], json!("c1"));
        assert_eq!(
            TenantRetrievalPolicy.filter_expression(&request.context).unwrap(),
            Some(Expression::eq("conversationId", "c1"))
        );
    }

    #[test]
    fn metadata_without_tenant_keys_is_not_copied() {
        let mut request = request_with_metadata("q", json!({"source": "a.pdf"}));
        TenantRetrievalPolicy.prepare(&mut request);
        assert!(request.context.is_empty());
    }

    #[tokio::test]
    async fn conversation_only_scope_excludes_other_conversations() {
        let advisor = QuestionAnswerAdvisor::tenant_scoped(seeded_store().await).with_top_k(10);
        let request = request_with_metadata("q", json!({"conversationId": "c1"}));
        let request = advisor.before(request).await.unwrap();
        let mut ids: Vec<String> = retrieved_documents(&request.context)
            .into_iter()
            .map(|d| d.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn default_policy_uses_raw_filter_only() {
        let mut context = AdvisorContext::new();
        assert!(DefaultRetrievalPolicy.filter_expression(&context).unwrap().is_none());
        context.insert(FILTER_EXPRESSION_KEY.into(), json!("source == 'a.pdf'"));
        assert_eq!(
            DefaultRetrievalPolicy.filter_expression(&context).unwrap(),
            Some(Expression::eq("source", "a.pdf"))
        );
        context.insert(FILTER_EXPRESSION_KEY.into(), json!("source =="));
        assert!(DefaultRetrievalPolicy.filter_expression(&context).is_err());
    }

    #[tokio::test]
    async fn after_copies_documents_into_response_metadata() {
        let advisor = QuestionAnswerAdvisor::new(seeded_store().await);
        let request = advisor
            .before(request_with_metadata("q", json!({})))
            .await
            .unwrap();
        let response = advisor
            .after(ChatClientResponse {
                response: ChatResponse::new("m", "answer"),
                context: request.context,
            })
            .unwrap();
        let docs = response.response.metadata[RETRIEVED_DOCUMENTS_KEY]
            .as_array()
            .unwrap();
        assert_eq!(docs.len(), 3);
    }

    #[test]
    fn template_is_rendered_in_one_pass() {
        let out = render_template(
            "Q: {query}\nC: {question_answer_context}\n{other}",
            &[("query", "{question_answer_context}?"), ("question_answer_context", "ctx")],
        );
        assert_eq!(out, "Q: {question_answer_context}?\nC: ctx\n{other}");
        assert_eq!(render_template("no braces", &[]), "no braces");
        assert_eq!(render_template("open { only", &[]), "open { only");
    }
}
