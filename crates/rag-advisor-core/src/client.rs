//! Fluent chat client over a [`ChatModel`] and an advisor chain.
//!
//! ```rust,ignore
//! let client = ChatClient::builder(model)
//!     .default_system("You answer questions about the user's documents.")
//!     .default_advisor(Arc::new(QuestionAnswerAdvisor::tenant_scoped(store)))
//!     .build();
//!
//! let answer = client
//!     .prompt()
//!     .user("What is the notice period?")
//!     .user_metadata("userId", "u1")
//!     .user_metadata("conversationId", "c1")
//!     .call()
//!     .await?;
//! println!("{}", answer.content());
//! ```
//!
//! `before` hooks run in registration order (client defaults first, then
//! advisors added on the prompt); `after` hooks run in reverse. Streaming
//! runs the `before` hooks only, since there is no complete response to
//! hand to `after`.

use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::advisor::{Advisor, AdvisorContext, ChatClientRequest, ChatClientResponse};
use crate::chat::{ChatModel, ChatResponse, ContentStream, Message, Prompt};
use crate::models::Metadata;
use crate::output::{decode_entity, format_instructions};

#[derive(Clone)]
pub struct ChatClient {
    model: Arc<dyn ChatModel>,
    default_system: Option<String>,
    advisors: Vec<Arc<dyn Advisor>>,
}

impl ChatClient {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::builder(model).build()
    }

    pub fn builder(model: Arc<dyn ChatModel>) -> ChatClientBuilder {
        ChatClientBuilder {
            model,
            default_system: None,
            advisors: Vec::new(),
        }
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    pub fn prompt(&self) -> PromptSpec<'_> {
        PromptSpec {
            client: self,
            system: None,
            user: String::new(),
            user_metadata: Metadata::new(),
            context: AdvisorContext::new(),
            advisors: Vec::new(),
        }
    }
}

pub struct ChatClientBuilder {
    model: Arc<dyn ChatModel>,
    default_system: Option<String>,
    advisors: Vec<Arc<dyn Advisor>>,
}

impl ChatClientBuilder {
    pub fn default_system(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.default_system = if text.trim().is_empty() { None } else { Some(text) };
        self
    }

    pub fn default_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisors.push(advisor);
        self
    }

    pub fn build(self) -> ChatClient {
        ChatClient {
            model: self.model,
            default_system: self.default_system,
            advisors: self.advisors,
        }
    }
}

/// One request being assembled. Consumed by `call`, `stream` or `entity`.
pub struct PromptSpec<'a> {
    client: &'a ChatClient,
    system: Option<String>,
    user: String,
    user_metadata: Metadata,
    context: AdvisorContext,
    advisors: Vec<Arc<dyn Advisor>>,
}

impl<'a> PromptSpec<'a> {
    /// Override the client's default system prompt for this request.
    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system = Some(text.into());
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.user = text.into();
        self
    }

    /// Attach a metadata entry to the user message (not sent to the model).
    pub fn user_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_metadata.insert(key.into(), value.into());
        self
    }

    /// Seed the advisor context for this request.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisors.push(advisor);
        self
    }

    pub async fn call(self) -> Result<CallResponse> {
        self.execute(None).await
    }

    /// Call the model asking for JSON matching `T` and decode the answer.
    pub async fn entity<T: JsonSchema + DeserializeOwned>(self) -> Result<T> {
        let response = self.execute(Some(format_instructions::<T>())).await?;
        response.entity()
    }

    pub async fn stream(self) -> Result<ContentStream> {
        let model = self.client.model.clone();
        let (request, _) = self.run_before().await?;
        model.stream(&request.prompt).await
    }

    async fn execute(self, instructions: Option<String>) -> Result<CallResponse> {
        let model = self.client.model.clone();
        let (mut request, advisors) = self.run_before().await?;
        if let Some(instructions) = instructions {
            if let Some(message) = request.prompt.user_message_mut() {
                message.content.push_str(&instructions);
            }
        }

        let response = model.call(&request.prompt).await?;
        let mut response = ChatClientResponse {
            response,
            context: request.context,
        };
        for advisor in advisors.iter().rev() {
            response = advisor.after(response)?;
        }
        Ok(CallResponse { inner: response })
    }

    async fn run_before(self) -> Result<(ChatClientRequest, Vec<Arc<dyn Advisor>>)> {
        let mut messages = Vec::new();
        if let Some(system) = self.system.or_else(|| self.client.default_system.clone()) {
            messages.push(Message::system(system));
        }
        let mut user = Message::user(self.user);
        user.metadata = self.user_metadata;
        messages.push(user);

        let mut request = ChatClientRequest {
            prompt: Prompt::new(messages),
            context: self.context,
        };
        let advisors: Vec<Arc<dyn Advisor>> = self
            .client
            .advisors
            .iter()
            .cloned()
            .chain(self.advisors)
            .collect();
        for advisor in &advisors {
            tracing::trace!(advisor = advisor.name(), "advisor before");
            request = advisor.before(request).await?;
        }
        Ok((request, advisors))
    }
}

/// Result of a non-streamed call.
#[derive(Debug, Clone)]
pub struct CallResponse {
    inner: ChatClientResponse,
}

impl CallResponse {
    pub fn content(&self) -> &str {
        &self.inner.response.content
    }

    pub fn chat_response(&self) -> &ChatResponse {
        &self.inner.response
    }

    pub fn into_chat_response(self) -> ChatResponse {
        self.inner.response
    }

    pub fn context(&self) -> &AdvisorContext {
        &self.inner.context
    }

    /// Decode the answer text as JSON into `T`.
    pub fn entity<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(decode_entity(self.content())?)
    }
}
