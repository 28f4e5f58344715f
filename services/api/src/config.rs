use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tutor_core::speech::{ELEVEN_LABS_DEFAULT_BASE_URL, SpeechProvider};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// What to do with `message`/`photo` frames that arrive before a `session` frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnboundFramePolicy {
    /// Drop the frame without replying.
    #[default]
    Ignore,
    /// Reply with an `error` frame.
    Reject,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    /// `None` disables speech synthesis.
    pub speech_provider: Option<SpeechProvider>,
    pub eleven_labs_api_key: Option<String>,
    pub eleven_labs_base_url: String,
    pub eleven_labs_voice: String,
    pub google_tts_api_key: Option<String>,
    pub unbound_frame_policy: UnboundFramePolicy,
    pub session_idle_ttl: Option<Duration>,
    pub max_sessions: Option<usize>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

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

        let provider_str =
            std::env::var("TTS_PROVIDER").unwrap_or_else(|_| "elevenlabs".to_string());
        let speech_provider = match provider_str.to_lowercase().as_str() {
            "elevenlabs" => Some(SpeechProvider::ElevenLabs),
            "openai" => Some(SpeechProvider::OpenAI),
            "google" => Some(SpeechProvider::Google),
            "none" | "" => None,
            other => {
                return Err(ConfigError::InvalidValue(
                    "TTS_PROVIDER".to_string(),
                    format!("'{}' is not one of elevenlabs, openai, google, none", other),
                ));
            }
        };

        let eleven_labs_api_key = std::env::var("ELEVEN_LABS_API_KEY").ok();
        let eleven_labs_base_url = std::env::var("ELEVEN_LABS_BASE_URL")
            .unwrap_or_else(|_| ELEVEN_LABS_DEFAULT_BASE_URL.to_string());
        let eleven_labs_voice = std::env::var("ELEVEN_LABS_VOICE_NAME")
            .unwrap_or_else(|_| SpeechProvider::ElevenLabs.default_voice().to_string());
        let google_tts_api_key = std::env::var("GOOGLE_TTS_API_KEY").ok();

        match speech_provider {
            Some(SpeechProvider::ElevenLabs) if eleven_labs_api_key.is_none() => {
                return Err(ConfigError::MissingVar(
                    "ELEVEN_LABS_API_KEY must be set for 'elevenlabs' speech provider".to_string(),
                ));
            }
            Some(SpeechProvider::Google) if google_tts_api_key.is_none() => {
                return Err(ConfigError::MissingVar(
                    "GOOGLE_TTS_API_KEY must be set for 'google' speech provider".to_string(),
                ));
            }
            _ => {}
        }

        let unbound_frame_policy = match std::env::var("UNBOUND_FRAME_POLICY")
            .unwrap_or_else(|_| "ignore".to_string())
            .to_lowercase()
            .as_str()
        {
            "ignore" => UnboundFramePolicy::Ignore,
            "reject" => UnboundFramePolicy::Reject,
            other => {
                return Err(ConfigError::InvalidValue(
                    "UNBOUND_FRAME_POLICY".to_string(),
                    format!("'{}' is not one of ignore, reject", other),
                ));
            }
        };

        // Zero disables idle eviction.
        let session_idle_ttl = optional_number::<u64>("SESSION_IDLE_TTL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let max_sessions = optional_number::<usize>("MAX_SESSIONS")?;

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_base_url,
            chat_model,
            log_level,
            prompts_path,
            speech_provider,
            eleven_labs_api_key,
            eleven_labs_base_url,
            eleven_labs_voice,
            google_tts_api_key,
            unbound_frame_policy,
            session_idle_ttl,
            max_sessions,
        })
    }
}

fn optional_number<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse::<T>().map(Some).map_err(|_| {
            ConfigError::InvalidValue(var.to_string(), format!("'{}' is not a number", value))
        }),
        Err(_) => Ok(None),
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
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("OPENAI_BASE_URL");
            env::remove_var("CHAT_MODEL");
            env::remove_var("RUST_LOG");
            env::remove_var("PROMPTS_PATH");
            env::remove_var("TTS_PROVIDER");
            env::remove_var("ELEVEN_LABS_API_KEY");
            env::remove_var("ELEVEN_LABS_BASE_URL");
            env::remove_var("ELEVEN_LABS_VOICE_NAME");
            env::remove_var("GOOGLE_TTS_API_KEY");
            env::remove_var("UNBOUND_FRAME_POLICY");
            env::remove_var("SESSION_IDLE_TTL_SECS");
            env::remove_var("MAX_SESSIONS");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
            env::set_var("ELEVEN_LABS_API_KEY", "test-eleven-key");
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
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8000");
        assert_eq!(config.openai_api_key, "test-openai-key");
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.prompts_path, PathBuf::from("./prompts"));
        assert_eq!(config.speech_provider, Some(SpeechProvider::ElevenLabs));
        assert_eq!(config.eleven_labs_voice, "EGQM7bHbTHTb7VUEcOHG");
        assert_eq!(config.eleven_labs_base_url, ELEVEN_LABS_DEFAULT_BASE_URL);
        assert_eq!(config.unbound_frame_policy, UnboundFramePolicy::Ignore);
        assert_eq!(config.session_idle_ttl, None);
        assert_eq!(config.max_sessions, None);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("OPENAI_API_KEY", "custom-openai-key");
            env::set_var("CHAT_MODEL", "gpt-4.1");
            env::set_var("RUST_LOG", "debug");
            env::set_var("PROMPTS_PATH", "/custom/prompts");
            env::set_var("TTS_PROVIDER", "google");
            env::set_var("GOOGLE_TTS_API_KEY", "google-key");
            env::set_var("UNBOUND_FRAME_POLICY", "reject");
            env::set_var("SESSION_IDLE_TTL_SECS", "900");
            env::set_var("MAX_SESSIONS", "500");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.chat_model, "gpt-4.1");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.prompts_path, PathBuf::from("/custom/prompts"));
        assert_eq!(config.speech_provider, Some(SpeechProvider::Google));
        assert_eq!(config.google_tts_api_key, Some("google-key".to_string()));
        assert_eq!(config.unbound_frame_policy, UnboundFramePolicy::Reject);
        assert_eq!(config.session_idle_ttl, Some(Duration::from_secs(900)));
        assert_eq!(config.max_sessions, Some(500));
    }

    #[test]
    #[serial]
    fn test_config_speech_disabled() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
            env::set_var("TTS_PROVIDER", "none");
        }

        let config = Config::from_env().expect("Config should load successfully");
        assert_eq!(config.speech_provider, None);
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();
        unsafe {
            env::set_var("TTS_PROVIDER", "none");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_eleven_labs_key() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("ELEVEN_LABS_API_KEY")),
            _ => panic!("Expected MissingVar for ELEVEN_LABS_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_policy_and_numbers() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("UNBOUND_FRAME_POLICY", "shout");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "UNBOUND_FRAME_POLICY"),
            _ => panic!("Expected InvalidValue for UNBOUND_FRAME_POLICY"),
        }

        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("MAX_SESSIONS", "lots");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "MAX_SESSIONS"),
            _ => panic!("Expected InvalidValue for MAX_SESSIONS"),
        }
    }
}
