//! storyforge configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{Mode, WavePlan};
use crate::events::DEFAULT_CHANNEL_CAPACITY;

/// Main storyforge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Wave pipeline settings
    pub pipeline: PipelineConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Event bus and JSONL event log
    pub events: EventsConfig,

    /// Log level used when the CLI does not pass one
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Fail fast when the LLM key is missing
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local: .storyforge.yml
        let local_config = PathBuf::from(".storyforge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User: ~/.config/storyforge/storyforge.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("storyforge").join("storyforge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (only "anthropic" is supported)
    pub provider: String,

    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            timeout_ms: 120_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).context(format!("Environment variable {} is not set", self.api_key_env))
    }
}

/// Wave pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Adds the optional image generation task to the last wave
    #[serde(rename = "image-generation")]
    pub image_generation: bool,

    #[serde(rename = "default-mode")]
    pub default_mode: Mode,

    /// Upper bound on tasks of one wave running at the same time
    #[serde(rename = "max-concurrent-tasks")]
    pub max_concurrent_tasks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_generation: false,
            default_mode: Mode::Balanced,
            max_concurrent_tasks: 4,
        }
    }
}

impl PipelineConfig {
    /// Wave plan for new sessions
    pub fn plan(&self) -> WavePlan {
        WavePlan::standard(self.image_generation)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the session store
    #[serde(rename = "store-dir")]
    pub store_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let store_dir = dirs::data_dir()
            .map(|d| d.join("storyforge").join("sessions"))
            .unwrap_or_else(|| PathBuf::from(".storyforge"));
        Self { store_dir }
    }
}

/// Event bus and event log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,

    /// Directory holding `<session>/events.jsonl`
    #[serde(rename = "runs-dir")]
    pub runs_dir: PathBuf,
}

impl Default for EventsConfig {
    fn default() -> Self {
        let runs_dir = dirs::data_dir()
            .map(|d| d.join("storyforge").join("runs"))
            .unwrap_or_else(|| PathBuf::from(".storyforge-runs"));
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            runs_dir,
        }
    }
}
