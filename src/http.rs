//! JSON-over-HTTP calls to model providers, with retry and backoff.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Other 4xx → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde_json::Value;

use crate::config::OPENAI_DEFAULT_URL;

pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Backoff before retry `attempt` (1-based).
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// Resolve the `OPENAI_API_KEY` for an OpenAI-compatible base URL.
///
/// The key is mandatory for the hosted OpenAI endpoint and optional for
/// self-hosted compatible servers.
pub fn openai_api_key(base_url: &str) -> Result<Option<String>> {
    let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
    if key.is_none() && base_url.trim_end_matches('/') == OPENAI_DEFAULT_URL {
        bail!("OPENAI_API_KEY environment variable not set");
    }
    Ok(key)
}

/// Build a POST request with JSON body and optional bearer token.
pub fn post(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
) -> reqwest::RequestBuilder {
    let request = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    match api_key {
        Some(key) => request.header("Authorization", format!("Bearer {}", key)),
        None => request,
    }
}

/// POST `body` to `url` and return the parsed JSON response.
///
/// `service` names the provider in error messages.
pub async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
    max_retries: u32,
    service: &str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            tracing::debug!(service, attempt, delay_secs = delay.as_secs(), "retrying request");
            tokio::time::sleep(delay).await;
        }

        match post(client, url, api_key, body).send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error ({}): {}", service, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", service)))
}
