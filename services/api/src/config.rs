use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported backend providers for the conversation loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub max_concurrent_calls: usize,
    /// Zero disables pruning of ended calls.
    pub ended_retention: Duration,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub enable_conversation: bool,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let max_concurrent_calls = parse_var::<usize>("MAX_CONCURRENT_CALLS", 100)?;
        if max_concurrent_calls == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_CALLS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let ended_retention =
            Duration::from_secs(parse_var::<u64>("ENDED_RETENTION_SECS", 3600)?);

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "gemini" => Provider::Gemini,
            "openai" => Provider::OpenAI,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{}' is not one of 'openai', 'gemini'", other),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let enable_conversation = parse_var::<bool>("ENABLE_CONVERSATION", true)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        if enable_conversation {
            match provider {
                Provider::OpenAI => {
                    if openai_api_key.is_none() {
                        return Err(ConfigError::MissingVar(
                            "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                        ));
                    }
                }
                Provider::Gemini => {
                    if gemini_api_key.is_none() {
                        return Err(ConfigError::MissingVar(
                            "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                        ));
                    }
                }
            }
        }

        Ok(Self {
            bind_address,
            max_concurrent_calls,
            ended_retention,
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            enable_conversation,
            log_level,
            prompts_path,
        })
    }

    /// The key for the selected provider, if one was configured.
    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
        }
    }

    pub fn api_base(&self) -> &'static str {
        match self.provider {
            Provider::OpenAI => "https://api.openai.com/v1/",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("MAX_CONCURRENT_CALLS");
            env::remove_var("ENDED_RETENTION_SECS");
            env::remove_var("LLM_PROVIDER");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("CHAT_MODEL");
            env::remove_var("ENABLE_CONVERSATION");
            env::remove_var("RUST_LOG");
            env::remove_var("PROMPTS_PATH");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.max_concurrent_calls, 100);
        assert_eq!(config.ended_retention, Duration::from_secs(3600));
        assert_eq!(config.provider, Provider::OpenAI);
        assert_eq!(config.api_key(), Some("test-openai-key"));
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert!(config.enable_conversation);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.prompts_path, PathBuf::from("./prompts"));
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("MAX_CONCURRENT_CALLS", "5");
            env::set_var("ENDED_RETENTION_SECS", "0");
            env::set_var("LLM_PROVIDER", "Gemini");
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("CHAT_MODEL", "gemini-2.0-flash");
            env::set_var("RUST_LOG", "debug");
            env::set_var("PROMPTS_PATH", "/custom/prompts");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.max_concurrent_calls, 5);
        assert!(config.ended_retention.is_zero());
        assert_eq!(config.provider, Provider::Gemini);
        assert_eq!(config.api_key(), Some("test-gemini-key"));
        assert!(config.api_base().contains("googleapis"));
        assert_eq!(config.chat_model, "gemini-2.0-flash");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.prompts_path, PathBuf::from("/custom/prompts"));
    }

    #[test]
    #[serial]
    fn test_conversation_disabled_needs_no_key() {
        clear_env_vars();
        unsafe {
            env::set_var("ENABLE_CONVERSATION", "false");
        }

        let config = Config::from_env().expect("Config should load without a key");
        assert!(!config.enable_conversation);
        assert_eq!(config.api_key(), None);
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_capacity() {
        clear_env_vars();
        unsafe {
            env::set_var("ENABLE_CONVERSATION", "false");
            env::set_var("MAX_CONCURRENT_CALLS", "0");
        }

        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "MAX_CONCURRENT_CALLS"),
            other => panic!("Expected InvalidValue for MAX_CONCURRENT_CALLS, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_numbers_and_provider() {
        for (var, value) in [
            ("MAX_CONCURRENT_CALLS", "many"),
            ("ENDED_RETENTION_SECS", "-1"),
            ("LLM_PROVIDER", "anthropic"),
            ("BIND_ADDRESS", "not-a-valid-address"),
            ("RUST_LOG", "not-a-level"),
        ] {
            clear_env_vars();
            unsafe {
                env::set_var("ENABLE_CONVERSATION", "false");
                env::set_var(var, value);
            }
            match Config::from_env().unwrap_err() {
                ConfigError::InvalidValue(name, _) => assert_eq!(name, var),
                other => panic!("Expected InvalidValue for {var}, got {other:?}"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_provider_keys() {
        clear_env_vars();
        match Config::from_env().unwrap_err() {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            other => panic!("Expected MissingVar for OPENAI_API_KEY, got {other:?}"),
        }

        unsafe {
            env::set_var("LLM_PROVIDER", "gemini");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::MissingVar(msg) => assert!(msg.contains("GEMINI_API_KEY")),
            other => panic!("Expected MissingVar for GEMINI_API_KEY, got {other:?}"),
        }
    }
}
