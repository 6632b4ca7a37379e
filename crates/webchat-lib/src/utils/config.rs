// Chat configuration
// Feature: Browser Chat (001-chat-session)
//
// Loaded from TOML. Every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{GenerationParameters, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT};

fn default_storage_key() -> String {
    "chat".to_string()
}

fn default_engine_endpoint() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_load_timeout_secs() -> Option<u64> {
    Some(600)
}

fn default_delta_idle_timeout_secs() -> Option<u64> {
    Some(120)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ChatConfig {
    /// Namespace key the session is persisted under
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// SQLite file; the app data directory when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Base URL of an OpenAI-compatible engine
    #[serde(default = "default_engine_endpoint")]
    pub engine_endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model used when nothing was persisted
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,
    /// Model load deadline, 0 disables
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: Option<u64>,
    /// Max silence between two deltas, 0 disables
    #[serde(default = "default_delta_idle_timeout_secs")]
    pub delta_idle_timeout_secs: Option<u64>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            database_path: None,
            engine_endpoint: default_engine_endpoint(),
            api_key: None,
            default_model: default_model(),
            default_system_prompt: default_system_prompt(),
            load_timeout_secs: default_load_timeout_secs(),
            delta_idle_timeout_secs: default_delta_idle_timeout_secs(),
        }
    }
}

fn as_timeout(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|s| *s > 0).map(Duration::from_secs)
}

impl ChatConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let config: ChatConfig =
            toml::from_str(content).map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.storage_key.trim().is_empty() {
            return Err("storage_key cannot be empty".to_string());
        }
        if self.default_model.trim().is_empty() {
            return Err("default_model cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn load_timeout(&self) -> Option<Duration> {
        as_timeout(self.load_timeout_secs)
    }

    pub fn delta_idle_timeout(&self) -> Option<Duration> {
        as_timeout(self.delta_idle_timeout_secs)
    }

    /// Parameters of a fresh session
    pub fn initial_parameters(&self) -> GenerationParameters {
        GenerationParameters {
            model: self.default_model.clone(),
            system_prompt: self.default_system_prompt.clone(),
            ..Default::default()
        }
    }
}
