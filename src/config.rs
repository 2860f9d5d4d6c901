use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
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
pub struct GithubConfig {
    #[serde(default = "default_github_api_base")]
    pub api_base: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api_base(),
            branch: default_branch(),
            include_globs: default_include_globs(),
            concurrent_requests: default_concurrent_requests(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.py".to_string(),
        "**/*.js".to_string(),
        "**/*.ts".to_string(),
        "**/*.md".to_string(),
    ]
}
fn default_concurrent_requests() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_openai_api_base")]
    pub api_base: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: default_openai_api_base(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_openai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_store_url")]
    pub url: String,
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    /// Build the server-side index immediately instead of waiting for the
    /// store's lazy indexing threshold.
    #[serde(default = "default_true")]
    pub indexed_search: bool,
    #[serde(default = "default_upsert_batch")]
    pub upsert_batch: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_vector_store_url(),
            collection_prefix: default_collection_prefix(),
            indexed_search: true,
            upsert_batch: default_upsert_batch(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_vector_store_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection_prefix() -> String {
    "repochat".to_string()
}
fn default_true() -> bool {
    true
}
fn default_upsert_batch() -> usize {
    128
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_openai_api_base")]
    pub api_base: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Number of retrieved chunks included in the prompt.
    #[serde(default = "default_context_chunks")]
    pub context_chunks: usize,
    /// Column width answers are wrapped to before display.
    #[serde(default = "default_answer_width")]
    pub answer_width: usize,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: default_openai_api_base(),
            model: default_generation_model(),
            context_chunks: default_context_chunks(),
            answer_width: default_answer_width(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_context_chunks() -> usize {
    8
}
fn default_answer_width() -> usize {
    100
}
fn default_generation_timeout_secs() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.github.concurrent_requests == 0 {
        anyhow::bail!("github.concurrent_requests must be > 0");
    }
    if config.github.include_globs.is_empty() {
        anyhow::bail!("github.include_globs must not be empty");
    }
    for glob in &config.github.include_globs {
        globset::Glob::new(glob)
            .with_context(|| format!("github.include_globs contains an invalid glob: {}", glob))?;
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.generation.context_chunks == 0 {
        anyhow::bail!("generation.context_chunks must be >= 1");
    }
    if config.generation.answer_width == 0 {
        anyhow::bail!("generation.answer_width must be > 0");
    }
    if config.vector_store.upsert_batch == 0 {
        anyhow::bail!("vector_store.upsert_batch must be > 0");
    }
    Ok(())
}

/// Template written by `repochat init`. Every value shown is the default.
pub const EXAMPLE_CONFIG: &str = r#"[server]
bind = "127.0.0.1:8080"

[github]
api_base = "https://api.github.com"
branch = "main"
include_globs = ["**/*.py", "**/*.js", "**/*.ts", "**/*.md"]
concurrent_requests = 5
timeout_secs = 30

[chunking]
max_tokens = 700

[embedding]
api_base = "https://api.openai.com/v1"
model = "text-embedding-3-small"
dims = 1536
batch_size = 64
max_retries = 5
timeout_secs = 30

[vector_store]
url = "http://localhost:6333"
collection_prefix = "repochat"
indexed_search = true
upsert_batch = 128
timeout_secs = 30

[generation]
api_base = "https://api.openai.com/v1"
model = "gpt-4o-mini"
context_chunks = 8
answer_width = 100
timeout_secs = 120
"#;
