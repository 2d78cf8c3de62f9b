//! Configuration management for ferry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::agent::{
    AgentSettings, DEFAULT_EXECUTE_PROMPT, DEFAULT_PLAN_PROMPT, LlmProvider, Mode, OpenAiProvider,
    ToolCallFormat,
};

/// Individual provider configuration.
///
/// Every provider speaks the OpenAI chat completions protocol; entries differ
/// only in endpoint and credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent configuration.
    pub agent: AgentConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// Loads global config first, then merges project-local config if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let global_path = Self::config_path()?;
        let mut config = if global_path.exists() {
            Self::from_toml(&std::fs::read_to_string(&global_path)?)?
        } else {
            Self::default()
        };

        if let Ok(project_path) = Self::project_config_path() {
            if project_path.exists() {
                let project_config = Self::from_toml(&std::fs::read_to_string(&project_path)?)?;
                config.merge(project_config);
            }
        }

        Ok(config)
    }

    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Get the project-local configuration file path.
    ///
    /// Looks for `.ferry/config.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn project_config_path() -> anyhow::Result<PathBuf> {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(".ferry").join("config.toml"))
    }

    /// Merge another config into this one (project overrides global).
    fn merge(&mut self, other: Self) {
        let defaults = AgentConfig::default();
        let (ours, theirs) = (&mut self.agent, other.agent);

        if theirs.provider != defaults.provider {
            ours.provider = theirs.provider;
        }
        if theirs.model != defaults.model {
            ours.model = theirs.model;
        }
        if theirs.max_tokens != defaults.max_tokens {
            ours.max_tokens = theirs.max_tokens;
        }
        if theirs.stream != defaults.stream {
            ours.stream = theirs.stream;
        }
        if theirs.tool_format != defaults.tool_format {
            ours.tool_format = theirs.tool_format;
        }
        if theirs.max_iterations != defaults.max_iterations {
            ours.max_iterations = theirs.max_iterations;
        }
        if theirs.compaction_threshold != defaults.compaction_threshold {
            ours.compaction_threshold = theirs.compaction_threshold;
        }
        if theirs.compaction_keep != defaults.compaction_keep {
            ours.compaction_keep = theirs.compaction_keep;
        }
        if theirs.mode != defaults.mode {
            ours.mode = theirs.mode;
        }
        if theirs.shell_timeout_secs != defaults.shell_timeout_secs {
            ours.shell_timeout_secs = theirs.shell_timeout_secs;
        }
        if theirs.prompts.plan.is_some() {
            ours.prompts.plan = theirs.prompts.plan;
        }
        if theirs.prompts.execute.is_some() {
            ours.prompts.execute = theirs.prompts.execute;
        }

        for (name, provider) in theirs.providers {
            if defaults.providers.get(&name) != Some(&provider) {
                ours.providers.insert(name, provider);
            }
        }
    }

    /// Get the configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the config directory path (`~/.config/ferry/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config_home).join("ferry"));
        }

        if cfg!(target_os = "macos") {
            if let Ok(home) = std::env::var("HOME") {
                return Ok(PathBuf::from(home).join(".config").join("ferry"));
            }
        }

        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        Ok(base.config_dir().join("ferry"))
    }

    /// Get the data directory path (`~/.local/share/ferry/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn data_dir() -> anyhow::Result<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine data directory"))?;

        Ok(base.data_dir().join("ferry"))
    }

    /// Get the conversation history file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn history_path() -> anyhow::Result<PathBuf> {
        Ok(Self::data_dir()?.join("conversation.json"))
    }
}

/// Prompt fragment overrides, one per mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<String>,
}

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name of the entry in `providers` to use.
    pub provider: String,

    pub model: String,

    pub max_tokens: u32,

    /// Request streamed replies.
    pub stream: bool,

    /// `native` or `inline` tool calls.
    pub tool_format: ToolCallFormat,

    pub max_iterations: usize,

    pub compaction_threshold: usize,

    pub compaction_keep: usize,

    /// Mode a new session starts in.
    pub mode: Mode,

    pub shell_timeout_secs: u64,

    pub prompts: PromptConfig,

    pub providers: HashMap<String, ProviderConfig>,
}

impl AgentConfig {
    /// Get the default provider configurations.
    fn default_providers() -> HashMap<String, ProviderConfig> {
        let mut providers = HashMap::new();

        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                base_url: None,
                api_key_env: Some("OPENAI_API_KEY".to_string()),
            },
        );

        providers.insert(
            "ollama".to_string(),
            ProviderConfig {
                base_url: Some("http://localhost:11434/v1".to_string()),
                api_key_env: None,
            },
        );

        providers.insert(
            "lmstudio".to_string(),
            ProviderConfig {
                base_url: Some("http://localhost:1234/v1".to_string()),
                api_key_env: None,
            },
        );

        providers
    }

    pub(crate) fn resolve_api_key(config: &ProviderConfig) -> Option<String> {
        let env_name = config.api_key_env.as_ref()?;
        std::env::var(env_name).ok().filter(|key| !key.is_empty())
    }

    /// Create the configured LLM provider.
    ///
    /// # Errors
    ///
    /// Returns error if the provider is unknown, or if it names an API key
    /// variable that is not set.
    pub fn create_provider(&self) -> anyhow::Result<Box<dyn LlmProvider>> {
        let config = self.providers.get(&self.provider).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown provider '{}', check [agent.providers] config",
                self.provider
            )
        })?;

        let api_key = Self::resolve_api_key(config);
        if api_key.is_none() {
            if let Some(env_name) = &config.api_key_env {
                anyhow::bail!(
                    "No API key configured for provider '{}'.\n\n\
                     Set the {env_name} environment variable.",
                    self.provider
                );
            }
        }

        tracing::debug!(provider = %self.provider, base_url = ?config.base_url, "creating provider");
        Ok(Box::new(OpenAiProvider::with_config(
            api_key,
            config.base_url.clone(),
        )))
    }

    /// Loop settings for a new agent.
    #[must_use]
    pub fn to_settings(&self) -> AgentSettings {
        AgentSettings {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            stream: self.stream,
            tool_format: self.tool_format,
            max_iterations: self.max_iterations,
            compaction_threshold: self.compaction_threshold,
            compaction_keep: self.compaction_keep,
        }
    }

    /// Shell command time budget.
    #[must_use]
    pub const fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }

    /// Plan fragment, configured or default.
    #[must_use]
    pub fn plan_prompt(&self) -> &str {
        self.prompts.plan.as_deref().unwrap_or(DEFAULT_PLAN_PROMPT)
    }

    /// Execute fragment, configured or default.
    #[must_use]
    pub fn execute_prompt(&self) -> &str {
        self.prompts
            .execute
            .as_deref()
            .unwrap_or(DEFAULT_EXECUTE_PROMPT)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let settings = AgentSettings::default();
        Self {
            provider: "openai".to_string(),
            model: settings.model,
            max_tokens: settings.max_tokens,
            stream: settings.stream,
            tool_format: settings.tool_format,
            max_iterations: settings.max_iterations,
            compaction_threshold: settings.compaction_threshold,
            compaction_keep: settings.compaction_keep,
            mode: Mode::default(),
            shell_timeout_secs: 120,
            prompts: PromptConfig::default(),
            providers: Self::default_providers(),
        }
    }
}
