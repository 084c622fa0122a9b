use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{ChatError, Result};
use crate::models::{Intention, ProviderName};

/// Main configuration structure for the chat backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub openai: OpenAIConfig,
    pub anthropic: AnthropicConfig,
    pub fireworks: FireworksConfig,
    pub pinecone: PineconeConfig,
    pub models: ModelsConfig,
    pub chat: ChatConfig,
    pub identity: IdentityConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// When set, every route except `/health` requires this bearer token
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub version: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireworksConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PineconeConfig {
    #[serde(default)]
    pub api_key: String,
    pub index_name: String,
    /// Data-plane host; resolved from the control plane at startup when absent
    #[serde(default)]
    pub index_host: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub control_plane_url: String,
    pub top_k: u32,
}

/// Model and temperature for a non-streaming helper call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model: String,
    pub temperature: f32,
}

/// Provider, model and temperature used to stream an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseProfile {
    pub provider: ProviderName,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub intention: ModelProfile,
    pub hyde: ModelProfile,
    pub question: ResponseProfile,
    pub hostile: ResponseProfile,
    pub random: ResponseProfile,
}

impl ModelsConfig {
    pub fn response_profile(&self, intention: Intention) -> &ResponseProfile {
        match intention {
            Intention::Question => &self.question,
            Intention::HostileMessage => &self.hostile,
            Intention::Random => &self.random,
        }
    }

    fn response_profiles(&self) -> [(&'static str, &ResponseProfile); 3] {
        [
            ("question", &self.question),
            ("hostile", &self.hostile),
            ("random", &self.random),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Number of trailing messages sent to the classifier and HyDE prompts
    pub history_context_length: usize,
    pub initial_message: String,
    pub default_response_message: String,
    pub retrieval_error_message: String,
    /// Conversation size, in words, after which the client asks for a break
    pub word_cutoff: usize,
    pub word_break_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub owner_name: String,
    pub owner_description: String,
    pub ai_name: String,
    pub ai_tone: String,
    pub ai_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Config {
    /// Load configuration from file with environment variable overrides.
    /// A config that fails validation is fatal: the service must not start.
    pub fn load() -> Result<Self> {
        for path in ["../.env", ".env"] {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                break;
            }
        }

        let config_path =
            env::var("RAGCHAT_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        let mut config = Self::from_file(&config_path)?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML config file; a missing file yields the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("Config file not found at {} - using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let config = serde_yaml::from_str::<Config>(&contents).map_err(|e| {
            ChatError::Config(format!("Failed to parse config file {}: {e}", path.display()))
        })?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = env::var("RAGCHAT_BIND") {
            self.server.bind = bind;
        }
        if let Ok(token) = env::var("RAGCHAT_BEARER_TOKEN") {
            self.server.bearer_token = Some(token).filter(|t| !t.is_empty());
        }

        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            self.openai.api_key = api_key;
        }
        if let Ok(api_key) = env::var("ANTHROPIC_API_KEY") {
            self.anthropic.api_key = api_key;
        }
        if let Ok(api_key) = env::var("FIREWORKS_API_KEY") {
            self.fireworks.api_key = api_key;
        }

        if let Ok(api_key) = env::var("PINECONE_API_KEY") {
            self.pinecone.api_key = api_key;
        }
        if let Ok(index_name) = env::var("PINECONE_INDEX_NAME") {
            self.pinecone.index_name = index_name;
        }
        if let Ok(host) = env::var("PINECONE_INDEX_HOST") {
            self.pinecone.index_host = Some(host).filter(|h| !h.is_empty());
        }
        if let Ok(top_k) = env::var("PINECONE_TOP_K") {
            if let Ok(k) = top_k.parse() {
                self.pinecone.top_k = k;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ChatError::Config(format!(
                "server.bind must be host:port, got {:?}",
                self.server.bind
            )));
        }

        // Classification, HyDE and embeddings always go through OpenAI
        if self.openai.api_key.is_empty() {
            return Err(ChatError::Config(
                "OPENAI_API_KEY environment variable must be set".into(),
            ));
        }
        if self.pinecone.api_key.is_empty() {
            return Err(ChatError::Config(
                "PINECONE_API_KEY environment variable must be set".into(),
            ));
        }
        if self.pinecone.index_name.trim().is_empty() {
            return Err(ChatError::Config("pinecone.index_name cannot be empty".into()));
        }
        if self.pinecone.top_k == 0 {
            return Err(ChatError::Config("pinecone.top_k cannot be 0".into()));
        }

        for (name, profile) in self.models.response_profiles() {
            let key = match profile.provider {
                ProviderName::OpenAi => &self.openai.api_key,
                ProviderName::Anthropic => &self.anthropic.api_key,
                ProviderName::Fireworks => &self.fireworks.api_key,
            };
            if key.is_empty() {
                return Err(ChatError::Config(format!(
                    "models.{name} uses {} but its API key is not set",
                    profile.provider
                )));
            }
            check_temperature(&format!("models.{name}"), profile.temperature)?;
        }
        check_temperature("models.intention", self.models.intention.temperature)?;
        check_temperature("models.hyde", self.models.hyde.temperature)?;

        if self.chat.history_context_length == 0 {
            return Err(ChatError::Config(
                "chat.history_context_length cannot be 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ChatError::Config("retry.max_attempts cannot be 0".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ChatError::Config(
                "Retry jitter factor must be between 0.0 and 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Get retry initial delay as Duration
    pub fn get_retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry.initial_delay_ms)
    }

    /// Get retry delay cap as Duration
    pub fn get_retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry.max_delay_ms)
    }
}

fn check_temperature(name: &str, temperature: f32) -> Result<()> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ChatError::Config(format!(
            "{name}.temperature must be between 0.0 and 2.0"
        )));
    }
    Ok(())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            bearer_token: None,
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
        }
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            version: "2023-06-01".to_string(),
            max_tokens: 4096,
        }
    }
}

impl Default for FireworksConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.fireworks.ai/inference/v1".to_string(),
        }
    }
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            index_name: "my-ai".to_string(),
            index_host: None,
            namespace: None,
            control_plane_url: "https://api.pinecone.io".to_string(),
            top_k: 7,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            intention: ModelProfile {
                model: "gpt-4o-mini".to_string(),
                temperature: 0.7,
            },
            hyde: ModelProfile {
                model: "gpt-4o-mini".to_string(),
                temperature: 0.7,
            },
            question: ResponseProfile {
                provider: ProviderName::OpenAi,
                model: "gpt-4o".to_string(),
                temperature: 0.7,
            },
            hostile: ResponseProfile {
                provider: ProviderName::OpenAi,
                model: "gpt-4o-mini".to_string(),
                temperature: 0.7,
            },
            random: ResponseProfile {
                provider: ProviderName::OpenAi,
                model: "gpt-4o-mini".to_string(),
                temperature: 0.7,
            },
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_context_length: 8,
            initial_message: "Hello, I'm your AI assistant.".to_string(),
            default_response_message:
                "Sorry, I'm having trouble generating a response. Please try again later."
                    .to_string(),
            retrieval_error_message:
                "Sorry, I couldn't search my documents right now. Please try again later."
                    .to_string(),
            word_cutoff: 12000,
            word_break_message:
                "This conversation has gotten long. Please clear it and start a new one."
                    .to_string(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            owner_name: "the owner".to_string(),
            owner_description: "the person this assistant represents".to_string(),
            ai_name: "Assistant".to_string(),
            ai_tone: "friendly and concise".to_string(),
            ai_role: "answer questions using the owner's documents".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            jitter_factor: 0.2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            openai: OpenAIConfig::default(),
            anthropic: AnthropicConfig::default(),
            fireworks: FireworksConfig::default(),
            pinecone: PineconeConfig::default(),
            models: ModelsConfig::default(),
            chat: ChatConfig::default(),
            identity: IdentityConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        let mut cfg = Config::default();
        cfg.openai.api_key = "sk-test".to_string();
        cfg.pinecone.api_key = "pc-test".to_string();
        cfg
    }

    #[test]
    fn test_defaults_require_credentials() {
        let err = Config::default().validate().expect_err("no keys configured");
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let mut cfg = Config::default();
        cfg.openai.api_key = "sk-test".to_string();
        let err = cfg.validate().expect_err("pinecone key missing");
        assert!(err.to_string().contains("PINECONE_API_KEY"));

        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_provider_key_required_when_profile_uses_it() {
        let mut cfg = configured();
        cfg.models.question.provider = ProviderName::Anthropic;
        let err = cfg.validate().expect_err("anthropic key missing");
        assert!(err.to_string().contains("models.question"));

        cfg.anthropic.api_key = "ak-test".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_index_and_bad_temperature() {
        let mut cfg = configured();
        cfg.pinecone.index_name = "  ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = configured();
        cfg.models.hyde.temperature = 3.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
pinecone:
  index_name: docs
  control_plane_url: https://api.pinecone.io
  top_k: 3
models:
  intention: { model: gpt-4o-mini, temperature: 0.0 }
  hyde: { model: gpt-4o-mini, temperature: 0.7 }
  question: { provider: anthropic, model: claude-3-5-sonnet-latest, temperature: 0.5 }
  hostile: { provider: openai, model: gpt-4o-mini, temperature: 0.7 }
  random: { provider: fireworks, model: accounts/fireworks/models/llama-v3p1-8b-instruct, temperature: 0.9 }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("partial config parses");
        assert_eq!(cfg.pinecone.top_k, 3);
        assert_eq!(cfg.models.question.provider, ProviderName::Anthropic);
        assert_eq!(
            cfg.models.response_profile(Intention::Random).provider,
            ProviderName::Fireworks
        );
        assert_eq!(cfg.chat.history_context_length, 8);
        assert_eq!(cfg.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::from_file("/nonexistent/ragchat.yaml").expect("defaults");
        assert_eq!(cfg.pinecone.top_k, 7);
        assert_eq!(cfg.models.question.model, "gpt-4o");
    }
}
