//! Pipeline configuration: YAML file, every field defaulted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::TokenBudget;
use crate::gateway::RetryPolicy;
use crate::llm::ModelParams;
use crate::memory::MemoryLog;

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How agents address each other and which memory log is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationMode {
    #[default]
    Standard,
    Coordinated,
}

impl CoordinationMode {
    pub fn memory_log(&self) -> MemoryLog {
        match self {
            CoordinationMode::Standard => MemoryLog::Standard,
            CoordinationMode::Coordinated => MemoryLog::Coordinated,
        }
    }

    /// Whether prompts name the partner agent.
    pub fn names_partners(&self) -> bool {
        matches!(self, CoordinationMode::Coordinated)
    }
}

impl std::str::FromStr for CoordinationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(CoordinationMode::Standard),
            "coordinated" => Ok(CoordinationMode::Coordinated),
            _ => Err(format!("unknown coordination mode: '{s}'")),
        }
    }
}

impl std::fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinationMode::Standard => write!(f, "standard"),
            CoordinationMode::Coordinated => write!(f, "coordinated"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model id or alias sent to the completion service.
    pub model: String,
    pub max_completion_tokens: Option<u32>,
    /// Override for the service base URL (proxies, local servers).
    pub api_base_url: Option<String>,

    /// Conversation ceiling per agent, in estimated tokens.
    pub max_total_tokens: usize,
    /// Segments at or above this many estimated tokens go first in a prompt.
    pub cache_threshold_tokens: usize,

    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub call_timeout_secs: u64,

    /// Worker pool size for per-agent calls within a stage.
    pub max_concurrency: usize,
    /// Feedback cycles allowed after a session is done.
    pub max_refinement_attempts: u32,

    pub max_memory_records: usize,
    pub min_keyword_overlap: usize,
    /// Where memory logs live. None keeps memory in-process only.
    pub memory_dir: Option<PathBuf>,
    /// Where finished sessions are written as JSON. None disables.
    pub session_dir: Option<PathBuf>,
    /// Agent profile file (JSON or YAML). None uses the built-in pair.
    pub profiles_path: Option<PathBuf>,

    pub mode: CoordinationMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            max_completion_tokens: None,
            api_base_url: None,
            max_total_tokens: 2048,
            cache_threshold_tokens: 1024,
            max_retries: 3,
            base_delay_ms: 1000,
            max_jitter_ms: 250,
            call_timeout_secs: 120,
            max_concurrency: 4,
            max_refinement_attempts: 3,
            max_memory_records: 3,
            min_keyword_overlap: 1,
            memory_dir: Some(PathBuf::from(".deliberate")),
            session_dir: None,
            profiles_path: None,
            mode: CoordinationMode::Standard,
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_total_tokens == 0 {
            return Err(ConfigError::Invalid("max_total_tokens must be positive".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be positive".into()));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid("call_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn budget(&self) -> TokenBudget {
        TokenBudget::new(self.max_total_tokens, self.cache_threshold_tokens)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            model: Some(self.model.clone()),
            max_completion_tokens: self.max_completion_tokens,
            temperature: None,
        }
    }
}
