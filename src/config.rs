//! TOML configuration parsing and validation.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working search-augmented summarizer. Example:
//!
//! ```toml
//! [chat]
//! mode = "static"            # "search" | "static"
//!
//! [search]
//! keyword = "UFC"
//! max_results = 3
//! timeout_secs = 10
//!
//! [static_context]
//! path = "../data/context.txt"  # relative to the config file's directory
//!
//! [pipeline]
//! provider = "hf-inference"  # "hf-inference" | "local" | "disabled"
//! model = "deepset/roberta-base-squad2"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```
//!
//! The `MODEL_NAME` environment variable overrides the configured model.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pipeline::Task;

/// Environment variable that overrides the model identifier.
pub const MODEL_ENV: &str = "MODEL_NAME";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub static_context: StaticContextConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Directory relative paths are resolved against. Set by the loader.
    #[serde(skip)]
    pub resource_root: PathBuf,
}

/// Which composition answers `POST /chat`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Web search → summarization.
    #[default]
    Search,
    /// Static file → question answering.
    Static,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Search => "search",
            Mode::Static => "static",
        }
    }

    pub fn default_task(self) -> Task {
        match self {
            Mode::Search => Task::Summarization,
            Mode::Static => Task::QuestionAnswering,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ChatConfig {
    #[serde(default)]
    pub mode: Mode,
    /// Overrides the mode's default task.
    #[serde(default)]
    pub task: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_keyword")]
    pub keyword: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_search_url")]
    pub base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keyword: default_keyword(),
            max_results: default_max_results(),
            timeout_secs: default_search_timeout(),
            base_url: default_search_url(),
        }
    }
}

fn default_keyword() -> String {
    crate::search::DEFAULT_KEYWORD.to_string()
}
fn default_max_results() -> usize {
    crate::search::MAX_RESULTS
}
fn default_search_timeout() -> u64 {
    10
}
fn default_search_url() -> String {
    crate::search_ddg::DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StaticContextConfig {
    #[serde(default = "default_context_path")]
    pub path: PathBuf,
}

impl Default for StaticContextConfig {
    fn default() -> Self {
        Self {
            path: default_context_path(),
        }
    }
}

fn default_context_path() -> PathBuf {
    PathBuf::from("data/context.txt")
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL for hosted inference; the model id is appended.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Base URL of the model hub, used to resolve models at load time.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    #[serde(default = "default_pipeline_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Where the local provider caches downloaded models.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            endpoint: default_endpoint(),
            hub_url: default_hub_url(),
            timeout_secs: default_pipeline_timeout(),
            max_retries: default_max_retries(),
            cache_dir: None,
        }
    }
}

fn default_provider() -> String {
    "hf-inference".to_string()
}
fn default_endpoint() -> String {
    "https://router.huggingface.co/hf-inference/models".to_string()
}
fn default_hub_url() -> String {
    "https://huggingface.co".to_string()
}
fn default_pipeline_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

/// Settings for the MCP tool surface.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ToolConfig {
    /// Conversational model; falls back to the task default.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
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
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Task answering `POST /chat`.
    pub fn chat_task(&self) -> Result<Task> {
        match &self.chat.task {
            Some(task) => task.parse(),
            None => Ok(self.chat.mode.default_task()),
        }
    }

    /// Model for the chat pipeline: `MODEL_NAME`, then config, then default.
    pub fn chat_model(&self) -> Result<String> {
        let task = self.chat_task()?;
        Ok(resolve_model(
            std::env::var(MODEL_ENV).ok(),
            self.pipeline.model.as_deref(),
            task,
        ))
    }

    /// Model for the conversational tool: `MODEL_NAME`, then `[tool].model`.
    pub fn tool_model(&self) -> String {
        resolve_model(
            std::env::var(MODEL_ENV).ok(),
            self.tool.model.as_deref(),
            Task::Conversational,
        )
    }

    /// Absolute-or-root-relative path of the static context file.
    pub fn static_context_path(&self) -> PathBuf {
        if self.static_context.path.is_absolute() {
            self.static_context.path.clone()
        } else {
            self.resource_root.join(&self.static_context.path)
        }
    }

    pub fn is_known_provider(&self) -> bool {
        matches!(
            self.pipeline.provider.as_str(),
            "hf-inference" | "local" | "disabled"
        )
    }
}

/// Picks the first non-blank of the environment override and the configured
/// model, falling back to the task default.
pub fn resolve_model(env: Option<String>, configured: Option<&str>, task: Task) -> String {
    env.map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .or_else(|| {
            configured
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
        })
        .unwrap_or_else(|| task.default_model().to_string())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.resource_root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    validate(&config)?;
    Ok(config)
}

/// Loads `path` if it exists, otherwise returns the defaults rooted at the
/// working directory.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        let config = Config {
            resource_root: PathBuf::from("."),
            ..Config::default()
        };
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.search.max_results == 0 {
        bail!("search.max_results must be >= 1");
    }

    if config.search.timeout_secs == 0 {
        bail!("search.timeout_secs must be > 0");
    }

    if !config.is_known_provider() {
        bail!(
            "Unknown pipeline provider: '{}'. Must be hf-inference, local, or disabled.",
            config.pipeline.provider
        );
    }

    let task = config.chat_task().context("Invalid chat.task")?;

    if config.pipeline.provider == "local" && task != Task::QuestionAnswering {
        bail!(
            "pipeline.provider = \"local\" only supports question-answering, but chat uses {}",
            task
        );
    }

    Ok(())
}
