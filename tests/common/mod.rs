//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use rag_advisor_core::chat::{ChatModel, ChatResponse, ContentStream, Prompt};
use rag_advisor_core::embedding::EmbeddingModel;

/// Letter-frequency embedding: 26 letter counts, a digit count, and a
/// constant component so no vector is zero. Hex ids land near digit-heavy
/// text and far from ordinary prose.
pub struct LetterEmbedding;

pub const LETTER_DIMS: usize = 28;

pub fn letter_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; LETTER_DIMS];
    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
        } else if c.is_ascii_digit() {
            v[26] += 1.0;
        }
    }
    v[27] = 0.5;
    v
}

#[async_trait]
impl EmbeddingModel for LetterEmbedding {
    fn model_name(&self) -> &str {
        "letters"
    }

    fn dims(&self) -> usize {
        LETTER_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| letter_vector(t)).collect())
    }
}

pub fn embedder() -> Arc<dyn EmbeddingModel> {
    Arc::new(LetterEmbedding)
}

/// Chat model that answers with a fixed reply, or echoes the user message,
/// and records every prompt it receives.
#[derive(Default)]
pub struct RecordingChat {
    reply: Option<String>,
    prompts: Mutex<Vec<Prompt>>,
}

impl RecordingChat {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    fn answer(&self, prompt: &Prompt) -> String {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.reply
            .clone()
            .unwrap_or_else(|| prompt.user_text().to_string())
    }
}

#[async_trait]
impl ChatModel for RecordingChat {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn call(&self, prompt: &Prompt) -> Result<ChatResponse> {
        let mut response = ChatResponse::new("recording", self.answer(prompt));
        response.id = Some("resp-1".to_string());
        response.finish_reason = Some("stop".to_string());
        Ok(response)
    }

    async fn stream(&self, prompt: &Prompt) -> Result<ContentStream> {
        let text = self.answer(prompt);
        let words: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(futures::stream::iter(words).boxed())
    }
}

/// Three sentences that split into exactly three chunks with
/// [`small_splitter`].
pub const THREE_SENTENCES: &str = "First sentence about apples and pears.\n\
Second sentence about ocean waves.\n\
Third sentence about mountain peaks.";

pub fn small_splitter() -> rag_advisor_core::chunk::TokenTextSplitter {
    rag_advisor_core::chunk::TokenTextSplitter::new(rag_advisor_core::chunk::SplitterOptions {
        chunk_size: 10,
        min_chunk_size_chars: 5,
        min_chunk_length_to_embed: 5,
        max_num_chunks: 100,
        keep_separator: true,
    })
}

/// TOML config pointing at `root`, with embeddings and chat disabled.
pub fn config_toml(root: &std::path::Path, backend: &str) -> String {
    format!(
        r#"[db]
path = "{root}/data/rag.sqlite"

[store]
backend = "{backend}"

[ingest]
resource_dir = "{root}/resources"
"#,
        root = root.display(),
        backend = backend,
    )
}
