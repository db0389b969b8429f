use anyhow::{bail, Context, Result};
use rag_advisor_core::chunk::SplitterOptions;
use rag_advisor_core::ingest::{DedupStrategy, DEFAULT_DEDUP_TOP_K};
use rag_advisor_core::store::DEFAULT_TOP_K;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: SplitterOptions,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub dedup: DedupStrategy,
    #[serde(default = "default_dedup_top_k")]
    pub dedup_top_k: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dedup: DedupStrategy::default(),
            dedup_top_k: DEFAULT_DEDUP_TOP_K,
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_dedup_top_k() -> usize {
    DEFAULT_DEDUP_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub similarity_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            similarity_threshold: 0.0,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_chat_retries")]
    pub max_retries: u32,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: None,
            max_tokens: None,
            max_retries: 3,
            timeout_secs: 60,
            system_prompt: None,
        }
    }
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_chat_retries() -> u32 {
    3
}
fn default_chat_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Root directory for `classpath:` locators.
    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,
    /// Locators ingested (unscoped) when the server starts.
    #[serde(default)]
    pub startup: Vec<String>,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Whether the HTTP server may read raw paths and `file://` locators.
    #[serde(default)]
    pub allow_local_paths: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            resource_dir: default_resource_dir(),
            startup: Vec::new(),
            fetch_timeout_secs: default_fetch_timeout(),
            allow_local_paths: false,
        }
    }
}

fn default_resource_dir() -> PathBuf {
    PathBuf::from("./resources")
}
fn default_fetch_timeout() -> u64 {
    30
}

/// `[logging]` table: a default level plus per-module overrides.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }

    match config.store.backend.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown store backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }
    if config.store.dedup_top_k < 1 {
        bail!("store.dedup_top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    // local models have known dimensions; remote ones must be declared
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.chat.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown chat provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.chat.is_enabled() && config.chat.model.is_none() {
        bail!(
            "chat.model must be specified when provider is '{}'",
            config.chat.provider
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "[db]\npath = \"./data/rag.sqlite\"\n";

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.store.backend, "sqlite");
        assert_eq!(config.store.dedup, DedupStrategy::Auto);
        assert_eq!(config.store.dedup_top_k, 5);
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.min_chunk_size_chars, 350);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert!(!config.embedding.is_enabled());
        assert!(!config.chat.is_enabled());
        assert_eq!(config.logging.default, "info");
    }

    #[test]
    fn full_config_parses() {
        let config = parse_config(
            r#"
[db]
path = "/tmp/rag.sqlite"

[store]
backend = "memory"
dedup = "similarity"

[chunking]
chunk_size = 200
keep_separator = false

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768

[chat]
provider = "openai"
model = "gpt-4o-mini"
temperature = 0.2

[ingest]
startup = ["classpath:/pdf/manual.pdf"]
allow_local_paths = true

[logging]
default = "warn"
[logging.modules]
rag_advisor = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.store.dedup, DedupStrategy::Similarity);
        assert_eq!(config.chunking.chunk_size, 200);
        assert_eq!(config.chunking.min_chunk_length_to_embed, 5);
        assert!(!config.chunking.keep_separator);
        assert_eq!(config.embedding.dims, Some(768));
        assert_eq!(config.chat.temperature, Some(0.2));
        assert_eq!(config.ingest.startup.len(), 1);
        assert!(config.ingest.allow_local_paths);
        assert_eq!(config.logging.modules["rag_advisor"], "debug");
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            "[chunking]\nchunk_size = 0\n",
            "[retrieval]\ntop_k = 0\n",
            "[retrieval]\nsimilarity_threshold = 1.5\n",
            "[store]\nbackend = \"postgres\"\n",
            "[store]\ndedup = \"guess\"\n",
            "[embedding]\nprovider = \"openai\"\n",
            "[embedding]\nprovider = \"cohere\"\nmodel = \"m\"\ndims = 3\n",
            "[chat]\nprovider = \"openai\"\n",
        ];
        for case in cases {
            let text = format!("{}{}", MINIMAL, case);
            assert!(parse_config(&text).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn db_section_is_required() {
        assert!(parse_config("[server]\nbind = \"0.0.0.0:1\"\n").is_err());
    }
}
