//! Service configuration
//!
//! Layered as: optional config file, `DISPATCH__SECTION__KEY` environment
//! variables, then the bare variable names older deployments use
//! (`NEURAL_NETWORK_URL`, `AUTHORIZATION_TOKEN`, `CONVERSATION_ID`, ...).

use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream completion service
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    /// Completion endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Sent verbatim in the `Authorization` header
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Appended to the endpoint as `?conversation_id=...` when set
    #[serde(default)]
    pub conversation_id: Option<String>,

    /// Model identifier, also selects the token encoding profile
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Context window selection
#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    /// Token budget per completion request; 0 falls back to 4096
    #[serde(default = "default_budget")]
    pub budget: usize,
}

/// Per-conversation worker behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Pending turns buffered per conversation before producers wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Delay before resubmitting an overloaded request
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Typing indicator refresh period
    #[serde(default = "default_typing_interval_secs")]
    pub typing_interval_secs: u64,

    /// Replies reference the triggering message once more than this many turns are pending
    #[serde(default = "default_reply_depth_threshold")]
    pub reply_depth_threshold: usize,

    /// JSON file with turns seeded into every new conversation
    #[serde(default)]
    pub prompts_path: Option<PathBuf>,
}

/// Answer policy used by transports
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mention_keywords: Vec<String>,

    #[serde(default = "default_reply_probability")]
    pub reply_probability: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_endpoint() -> String { "http://localhost:8080/v1/chat/completions".to_string() }
fn default_model() -> String { "gpt-4".to_string() }
fn default_timeout_secs() -> u64 { 60 }
fn default_budget() -> usize { 7000 }
fn default_queue_capacity() -> usize { 64 }
fn default_retry_backoff_ms() -> u64 { 2000 }
fn default_typing_interval_secs() -> u64 { 5 }
fn default_reply_depth_threshold() -> usize { 2 }
fn default_reply_probability() -> f64 { 0.25 }
fn default_log_level() -> String { "info".to_string() }

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            conversation_id: None,
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { budget: default_budget() }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            retry_backoff_ms: default_retry_backoff_ms(),
            typing_interval_secs: default_typing_interval_secs(),
            reply_depth_threshold: default_reply_depth_threshold(),
            prompts_path: None,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mention_keywords: Vec::new(),
            reply_probability: default_reply_probability(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DispatchConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn typing_interval(&self) -> Duration {
        Duration::from_secs(self.typing_interval_secs)
    }
}

impl Config {
    /// Load from an optional file plus environment, then validate.
    ///
    /// Without an explicit path, `dispatch.{toml,yaml,json}` in the working
    /// directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("dispatch").required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("DISPATCH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("policy.mention_keywords")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        let config = config.from_env();
        config.validate()?;
        Ok(config)
    }

    /// Override with the bare environment variable names
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("NEURAL_NETWORK_URL") {
            self.completion.endpoint = val;
        }

        if let Ok(val) = std::env::var("AUTHORIZATION_TOKEN") {
            self.completion.api_key = Some(SecretString::new(val));
        }

        if let Ok(val) = std::env::var("CONVERSATION_ID") {
            self.completion.conversation_id = Some(val).filter(|v| !v.is_empty());
        }

        if let Ok(val) = std::env::var("COMPLETION_MODEL") {
            self.completion.model = val;
        }

        if let Ok(val) = std::env::var("PROMPTS_PATH") {
            self.dispatch.prompts_path = Some(PathBuf::from(val));
        }

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.completion.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("completion.endpoint must not be empty".into()));
        }
        if self.completion.timeout_secs == 0 {
            return Err(ConfigError::Invalid("completion.timeout_secs must be positive".into()));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::Invalid("dispatch.queue_capacity must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.policy.reply_probability) {
            return Err(ConfigError::Invalid(format!(
                "policy.reply_probability must be within [0, 1], got {}",
                self.policy.reply_probability
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.completion.model, "gpt-4");
        assert_eq!(config.completion.timeout(), Duration::from_secs(60));
        assert_eq!(config.context.budget, 7000);
        assert_eq!(config.dispatch.retry_backoff(), Duration::from_secs(2));
        assert_eq!(config.dispatch.typing_interval(), Duration::from_secs(5));
        assert_eq!(config.dispatch.reply_depth_threshold, 2);
        assert_eq!(config.policy.reply_probability, 0.25);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_config_from_env() {
        std::env::set_var("NEURAL_NETWORK_URL", "http://custom:9000/chat");
        std::env::set_var("AUTHORIZATION_TOKEN", "test-key");
        std::env::set_var("CONVERSATION_ID", "conv-42");

        let config = Config::default().from_env();

        assert_eq!(config.completion.endpoint, "http://custom:9000/chat");
        assert_eq!(
            config.completion.api_key.as_ref().map(|k| k.expose_secret().as_str()),
            Some("test-key")
        );
        assert_eq!(config.completion.conversation_id.as_deref(), Some("conv-42"));

        // Cleanup
        std::env::remove_var("NEURAL_NETWORK_URL");
        std::env::remove_var("AUTHORIZATION_TOKEN");
        std::env::remove_var("CONVERSATION_ID");
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("dispatch-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
                [completion]
                timeout_secs = 30

                [context]
                budget = 5000

                [dispatch]
                queue_capacity = 8

                [policy]
                mention_keywords = ["polina", "granny"]
            "#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.completion.timeout_secs, 30);
        assert_eq!(config.context.budget, 5000);
        assert_eq!(config.dispatch.queue_capacity, 8);
        assert_eq!(config.dispatch.retry_backoff_ms, 2000);
        assert_eq!(config.policy.mention_keywords, vec!["polina", "granny"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.dispatch.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.policy.reply_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.completion.endpoint = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
