use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow, bail};

use crate::provider::Provider;
use crate::state::ProviderConfig;

pub const DEFAULT_MAX_TOKENS: u32 = 4000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Placeholder credential handed to the local backend.
pub const LOCAL_API_KEY: &str = "local";

/// Persisted settings. Every field is optional on disk; absent fields fall
/// back to the documented defaults when a call is resolved.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub default_provider: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub claude_model: Option<String>,
    pub openai_model: Option<String>,
    pub ollama_model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub include_file_context: Option<bool>,
    /// When set, `ANTHROPIC_API_KEY`/`OPENAI_API_KEY` are not consulted.
    #[serde(skip)]
    pub ignore_env: bool,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve keys from this file alone, ignoring the environment.
    pub fn without_env(mut self) -> Self {
        self.ignore_env = true;
        self
    }

    fn env_key(&self, provider: Provider) -> Option<String> {
        if self.ignore_env {
            return None;
        }
        provider
            .api_key_env()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)
            .map_err(|e| anyhow!("Failed to parse config {:?}: {}", path, e))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("codecook").join("config.json"))
    }

    /// Backend used at startup; unknown or missing values mean Claude.
    pub fn default_provider(&self) -> Provider {
        self.default_provider
            .as_deref()
            .and_then(Provider::from_str)
            .unwrap_or(Provider::Claude)
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn include_file_context(&self) -> bool {
        self.include_file_context.unwrap_or(true)
    }

    pub fn model(&self, provider: Provider) -> String {
        let configured = match provider {
            Provider::Claude => self.claude_model.as_deref(),
            Provider::OpenAI => self.openai_model.as_deref(),
            Provider::Ollama => self.ollama_model.as_deref(),
        };
        configured
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(provider.default_model())
            .to_string()
    }

    /// Stored credential for a backend, with the environment taking precedence.
    pub fn api_key(&self, provider: Provider) -> String {
        let stored = match provider {
            Provider::Claude => self.anthropic_api_key.as_deref(),
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Ollama => return LOCAL_API_KEY.to_string(),
        };
        self.env_key(provider)
            .or_else(|| stored.map(str::to_string))
            .unwrap_or_default()
    }

    /// Where an API key comes from: "env", "config", "local", or None.
    pub fn key_source(&self, provider: Provider) -> Option<&'static str> {
        if !provider.requires_api_key() {
            return Some("local");
        }
        if self.env_key(provider).is_some() {
            return Some("env");
        }
        let stored = match provider {
            Provider::Claude => self.anthropic_api_key.as_deref(),
            _ => self.openai_api_key.as_deref(),
        };
        stored.filter(|k| !k.is_empty()).map(|_| "config")
    }

    /// Maps the settings into the record a single call needs.
    pub fn provider_config(&self, provider: Provider) -> ProviderConfig {
        ProviderConfig {
            api_key: self.api_key(provider),
            model: self.model(provider),
            max_tokens: self.max_tokens(),
            temperature: self.temperature(),
        }
    }

    /// Updates one setting by its key name, as used by `config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let text = || Some(value.to_string()).filter(|v| !v.is_empty());
        match key {
            "default_provider" => {
                let provider = Provider::from_str(value)
                    .ok_or_else(|| anyhow!("Unknown provider: {}", value))?;
                self.default_provider = Some(provider.as_str().to_string());
            }
            "anthropic_api_key" => self.anthropic_api_key = text(),
            "openai_api_key" => self.openai_api_key = text(),
            "claude_model" => self.claude_model = text(),
            "openai_model" => self.openai_model = text(),
            "ollama_model" => self.ollama_model = text(),
            "max_tokens" => {
                let n: u32 = value.parse()?;
                if n == 0 {
                    bail!("max_tokens must be greater than zero");
                }
                self.max_tokens = Some(n);
            }
            "temperature" => self.temperature = Some(value.parse()?),
            "include_file_context" => self.include_file_context = Some(value.parse()?),
            _ => bail!("Unknown setting: {}", key),
        }
        Ok(())
    }

    pub fn keys() -> &'static [&'static str] {
        &[
            "default_provider",
            "anthropic_api_key",
            "openai_api_key",
            "claude_model",
            "openai_model",
            "ollama_model",
            "max_tokens",
            "temperature",
            "include_file_context",
        ]
    }
}
