//! Chat model implementations.
//!
//! - **[`OpenAIChat`]**: `POST {url}/chat/completions`; streaming reads
//!   Server-Sent Events until `data: [DONE]`.
//! - **[`OllamaChat`]**: `POST {url}/api/chat`; streaming reads
//!   newline-delimited JSON until `"done": true`.
//! - **[`DisabledChat`]**: returns errors; used when `[chat]` is not configured.
//!
//! Non-streaming calls retry as described in [`crate::http`]. A stream is
//! never retried once it has started.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use rag_advisor_core::chat::{ChatModel, ChatResponse, ContentStream, Prompt, Usage};
use serde_json::{json, Value};

use crate::config::{ChatConfig, OLLAMA_DEFAULT_URL, OPENAI_DEFAULT_URL};
use crate::http;

fn messages_json(prompt: &Prompt) -> Value {
    Value::Array(
        prompt
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect(),
    )
}

// ============ Disabled ============

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn call(&self, _prompt: &Prompt) -> Result<ChatResponse> {
        bail!("Chat provider is disabled")
    }

    async fn stream(&self, _prompt: &Prompt) -> Result<ContentStream> {
        bail!("Chat provider is disabled")
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAIChat {
    model: String,
    url: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("chat.model required for OpenAI provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());
        let api_key = http::openai_api_key(&url)?;
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn body(&self, prompt: &Prompt, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages_json(prompt),
            "stream": stream,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = self.max_tokens {
            body["max_tokens"] = json!(n);
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn call(&self, prompt: &Prompt) -> Result<ChatResponse> {
        let json = http::post_json_with_retry(
            &self.client,
            &format!("{}/chat/completions", self.url),
            self.api_key.as_deref(),
            &self.body(prompt, false),
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_completion(&json, &self.model)
    }

    async fn stream(&self, prompt: &Prompt) -> Result<ContentStream> {
        let response = http::post(
            &self.client,
            &format!("{}/chat/completions", self.url),
            self.api_key.as_deref(),
            &self.body(prompt, true),
        )
        .send()
        .await
        .map_err(|e| anyhow!("OpenAI connection error ({}): {}", self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }
        Ok(line_stream(response.bytes_stream(), parse_openai_sse_line))
    }
}

pub fn parse_openai_completion(json: &Value, fallback_model: &str) -> Result<ChatResponse> {
    let choice = json
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices"))?;
    let content = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let usage = json.get("usage").map(|u| Usage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: u["total_tokens"].as_u64().unwrap_or(0),
    });

    Ok(ChatResponse {
        id: json["id"].as_str().map(str::to_string),
        model: json["model"].as_str().unwrap_or(fallback_model).to_string(),
        content,
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        usage,
        metadata: Default::default(),
    })
}

// ============ Ollama ============

pub struct OllamaChat {
    model: String,
    url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("chat.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn body(&self, prompt: &Prompt, stream: bool) -> Value {
        let mut options = serde_json::Map::new();
        if let Some(t) = self.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(n) = self.max_tokens {
            options.insert("num_predict".into(), json!(n));
        }
        json!({
            "model": self.model,
            "messages": messages_json(prompt),
            "stream": stream,
            "options": options,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn call(&self, prompt: &Prompt) -> Result<ChatResponse> {
        let json = http::post_json_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &self.body(prompt, false),
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_completion(&json, &self.model)
    }

    async fn stream(&self, prompt: &Prompt) -> Result<ContentStream> {
        let response = http::post(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &self.body(prompt, true),
        )
        .send()
        .await
        .map_err(|e| {
            anyhow!("Ollama connection error (is Ollama running at {}?): {}", self.url, e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }
        Ok(line_stream(response.bytes_stream(), parse_ollama_line))
    }
}

pub fn parse_ollama_completion(json: &Value, fallback_model: &str) -> Result<ChatResponse> {
    if let Some(err) = json.get("error") {
        bail!("Ollama API error: {}", err);
    }
    let content = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message content"))?
        .to_string();

    let prompt_tokens = json["prompt_eval_count"].as_u64().unwrap_or(0);
    let completion_tokens = json["eval_count"].as_u64().unwrap_or(0);

    Ok(ChatResponse {
        id: Some(format!("ollama-{}", uuid::Uuid::new_v4())),
        model: json["model"].as_str().unwrap_or(fallback_model).to_string(),
        content,
        finish_reason: json["done_reason"].as_str().map(str::to_string),
        usage: Some(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }),
        metadata: Default::default(),
    })
}

// ============ Streaming ============

/// Outcome of parsing one line of a streaming response body.
#[derive(Debug)]
pub enum LineEvent {
    Content(String),
    Skip,
    Done,
    Error(anyhow::Error),
}

/// One SSE line of an OpenAI streaming completion.
pub fn parse_openai_sse_line(line: &str) -> LineEvent {
    let Some(payload) = line.strip_prefix("data:") else {
        // blank separators, comments, `event:` and `id:` fields
        return LineEvent::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return LineEvent::Done;
    }
    let json: Value = match serde_json::from_str(payload) {
        Ok(json) => json,
        Err(e) => return LineEvent::Error(anyhow!("Invalid OpenAI stream event: {}", e)),
    };
    if let Some(err) = json.get("error") {
        return LineEvent::Error(anyhow!("OpenAI stream error: {}", err));
    }
    match json.pointer("/choices/0/delta/content").and_then(|c| c.as_str()) {
        Some(text) if !text.is_empty() => LineEvent::Content(text.to_string()),
        _ => LineEvent::Skip,
    }
}

/// One NDJSON line of an Ollama streaming chat.
pub fn parse_ollama_line(line: &str) -> LineEvent {
    if line.trim().is_empty() {
        return LineEvent::Skip;
    }
    let json: Value = match serde_json::from_str(line) {
        Ok(json) => json,
        Err(e) => return LineEvent::Error(anyhow!("Invalid Ollama stream line: {}", e)),
    };
    if let Some(err) = json.get("error") {
        return LineEvent::Error(anyhow!("Ollama stream error: {}", err));
    }
    match json.pointer("/message/content").and_then(|c| c.as_str()) {
        Some(text) if !text.is_empty() => LineEvent::Content(text.to_string()),
        _ if json["done"].as_bool() == Some(true) => LineEvent::Done,
        _ => LineEvent::Skip,
    }
}

struct LineState<S> {
    inner: std::pin::Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    finished: bool,
    parse: fn(&str) -> LineEvent,
}

impl<S> LineState<S> {
    fn handle(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        match (self.parse)(line) {
            LineEvent::Content(text) => self.pending.push_back(Ok(text)),
            LineEvent::Skip => {}
            LineEvent::Done => self.finished = true,
            LineEvent::Error(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }

    fn drain_lines(&mut self) {
        while !self.finished {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle(&line);
        }
    }
}

/// Turn a chunked HTTP body into a stream of content deltas, one parsed
/// line at a time. Lines are split on raw bytes, so multi-byte characters
/// split across chunks are reassembled before decoding.
pub fn line_stream<S, B, E>(body: S, parse: fn(&str) -> LineEvent) -> ContentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = LineState {
        inner: Box::pin(body),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        parse,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(chunk.as_ref());
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.pending.push_back(Err(anyhow!("stream read failed: {}", e)));
                    st.finished = true;
                }
                None => {
                    let rest = std::mem::take(&mut st.buffer);
                    if !rest.is_empty() {
                        st.handle(&rest);
                    }
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Create the configured chat model.
pub fn create_chat_model(config: &ChatConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(stream: ContentStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    fn chunks(
        parts: &[&'static [u8]],
    ) -> impl Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> {
        let owned: Vec<_> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        futures::stream::iter(owned)
    }

    #[test]
    fn openai_completion_parses() {
        let json = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        });
        let r = parse_openai_completion(&json, "fallback").unwrap();
        assert_eq!(r.content, "Hi");
        assert_eq!(r.id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(r.finish_reason.as_deref(), Some("stop"));
        assert_eq!(r.usage.unwrap().total_tokens, 6);
        assert!(parse_openai_completion(&json!({}), "m").is_err());
    }

    #[test]
    fn ollama_completion_parses() {
        let json = json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "Hello"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 10,
            "eval_count": 3
        });
        let r = parse_ollama_completion(&json, "m").unwrap();
        assert_eq!(r.content, "Hello");
        assert_eq!(r.usage.unwrap().total_tokens, 13);
        assert!(parse_ollama_completion(&json!({"error": "model not found"}), "m").is_err());
    }

    #[tokio::test]
    async fn sse_stream_reassembles_split_lines_and_stops_at_done() {
        let body = chunks(&[
            b": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"caf\xc3",
            b"\xa9\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" ok\"}}]}\n\n",
            b"data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ]);
        let items = collect(line_stream(body, parse_openai_sse_line)).await;
        let texts: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["café", " ok"]);
    }

    #[tokio::test]
    async fn ndjson_stream_handles_unterminated_last_line() {
        let body = chunks(&[
            b"{\"message\":{\"content\":\"a\"},\"done\":false}\n{\"message\":{\"con",
            b"tent\":\"b\"},\"done\":false}\n{\"message\":{\"content\":\"\"},\"done\":true}",
        ]);
        let texts: Vec<String> = collect(line_stream(body, parse_ollama_line))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn stream_error_event_ends_stream_with_error() {
        let body = chunks(&[b"data: {\"error\":{\"message\":\"overloaded\"}}\n\n"]);
        let items = collect(line_stream(body, parse_openai_sse_line)).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn disabled_chat_errors() {
        let model = create_chat_model(&ChatConfig::default()).unwrap();
        assert!(model.call(&Prompt::default()).await.is_err());
        assert!(model.stream(&Prompt::default()).await.is_err());
    }
}
