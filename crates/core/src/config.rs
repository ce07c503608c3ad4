use crate::error::ConfigError;
use crate::llm::OpenAiCompatClient;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat-v3-0324:free";
pub const DEFAULT_APP_NAME: &str = "docqa";
pub const DEFAULT_APP_URL: &str = "https://localhost:3000";

/// Everything needed to reach a hosted chat-completions API.
///
/// The API key is never compiled in; it comes from `DOCQA_API_KEY` or the
/// command line.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub app_name: String,
    pub app_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 1500,
            timeout: Duration::from_secs(30),
            app_name: DEFAULT_APP_NAME.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
        }
    }
}

impl LlmConfig {
    /// Reads `DOCQA_API_KEY`, `DOCQA_BASE_URL`, `DOCQA_MODEL`,
    /// `DOCQA_TEMPERATURE`, `DOCQA_MAX_TOKENS`, `DOCQA_TIMEOUT_SECS`,
    /// `DOCQA_APP_NAME` and `DOCQA_APP_URL`. Unset or blank variables keep
    /// their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key).and_then(|value| {
                let value = value.trim().to_string();
                if value.is_empty() {
                    None
                } else {
                    Some(value)
                }
            })
        };

        let mut config = Self::default();
        if let Some(api_key) = read("DOCQA_API_KEY") {
            config.api_key = api_key;
        }
        if let Some(base_url) = read("DOCQA_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(model) = read("DOCQA_MODEL") {
            config.model = model;
        }
        if let Some(raw) = read("DOCQA_TEMPERATURE") {
            config.temperature = parse_value("temperature", &raw)?;
        }
        if let Some(raw) = read("DOCQA_MAX_TOKENS") {
            config.max_tokens = parse_value("max_tokens", &raw)?;
        }
        if let Some(raw) = read("DOCQA_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_value("timeout", &raw)?);
        }
        if let Some(app_name) = read("DOCQA_APP_NAME") {
            config.app_name = app_name;
        }
        if let Some(app_url) = read("DOCQA_APP_URL") {
            config.app_url = app_url;
        }

        Ok(config)
    }

    /// `None` keeps the configured default model.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model.filter(|model| !model.trim().is_empty()) {
            self.model = model;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            source,
        })?;
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "model",
                details: "model name must not be empty".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                name: "temperature",
                details: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_tokens",
                details: "must be greater than zero".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "timeout",
                details: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn build_client(&self) -> Result<OpenAiCompatClient, ConfigError> {
        OpenAiCompatClient::new(self.clone())
    }
}

fn parse_value<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|error: T::Err| ConfigError::InvalidValue {
        name,
        details: format!("`{raw}`: {error}"),
    })
}
