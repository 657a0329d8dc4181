//! Classroom Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default room credential lifetime in seconds (6 hours).
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 21_600;

/// Default quiz round duration before auto-close, in seconds.
pub const DEFAULT_ROUND_DURATION_SECONDS: u64 = 30;

/// Default score penalty per distraction.
pub const DEFAULT_DISTRACTION_PENALTY: u8 = 10;

/// Default voice command that advances the quiz.
pub const DEFAULT_TRIGGER_PHRASE: &str = "ask the question";

/// Default minimum gap between two voice triggers, in milliseconds.
pub const DEFAULT_VOICE_COOLDOWN_MS: u64 = 3000;

/// Default delay before restarting a finished recognition session, in milliseconds.
pub const DEFAULT_VOICE_RESTART_DELAY_MS: u64 = 500;

/// Default time an ended room stays queryable for its report, in seconds.
pub const DEFAULT_ENDED_ROOM_RETENTION_SECONDS: u64 = 600;

/// Default time a room may sit idle before it is ended, in seconds (2 hours).
pub const DEFAULT_IDLE_ROOM_TIMEOUT_SECONDS: u64 = 7200;

/// Default maximum number of rooms held by the directory.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Default chat-completions endpoint for the question generator.
pub const DEFAULT_GENERATOR_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Default question generator model.
pub const DEFAULT_GENERATOR_MODEL: &str = "llama3-8b-8192";

/// Minimum media API secret length (HS256 key strength).
pub const MIN_MEDIA_SECRET_BYTES: usize = 32;

/// Classroom Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Media platform API key, written into every credential as `iss`.
    pub media_api_key: String,

    /// Media platform API secret that signs room credentials.
    pub media_api_secret: SecretString,

    /// Media platform URL handed to clients alongside their credential.
    pub media_url: Option<String>,

    /// Credential lifetime.
    pub token_ttl: Duration,

    /// Postgres URL for the durable log. In-memory log when absent.
    pub database_url: Option<SecretString>,

    /// Quiz round duration before an Active topic auto-closes.
    pub round_duration: Duration,

    /// Score penalty per FOCUS_LOST.
    pub distraction_penalty: u8,

    /// Phrase that fires the voice trigger (stored lower-cased).
    pub trigger_phrase: String,

    /// Minimum gap between voice triggers.
    pub voice_cooldown: Duration,

    /// Delay before restarting the recognition session.
    pub voice_restart_delay: Duration,

    /// How long an Ended room stays queryable.
    pub ended_room_retention: Duration,

    /// How long a room may sit in Setup, or Live with nobody connected,
    /// before the directory ends it.
    pub idle_room_timeout: Duration,

    /// Maximum rooms held by the directory (Live and retained Ended).
    pub max_rooms: usize,

    /// Question generator endpoint.
    pub generator_url: String,

    /// Question generator API key. Topic generation is disabled when absent.
    pub generator_api_key: Option<SecretString>,

    /// Question generator model name.
    pub generator_model: String,

    /// Emit JSON log lines instead of plain text.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("media_api_key", &self.media_api_key)
            .field("media_api_secret", &"[REDACTED]")
            .field("media_url", &self.media_url)
            .field("token_ttl", &self.token_ttl)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("round_duration", &self.round_duration)
            .field("distraction_penalty", &self.distraction_penalty)
            .field("trigger_phrase", &self.trigger_phrase)
            .field("voice_cooldown", &self.voice_cooldown)
            .field("voice_restart_delay", &self.voice_restart_delay)
            .field("ended_room_retention", &self.ended_room_retention)
            .field("idle_room_timeout", &self.idle_room_timeout)
            .field("max_rooms", &self.max_rooms)
            .field("generator_url", &self.generator_url)
            .field(
                "generator_api_key",
                &self.generator_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("generator_model", &self.generator_model)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional variable, falling back to `default` only when it is unset.
fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(key) {
        Some(value_str) => value_str.trim().parse().map_err(|e| {
            ConfigError::InvalidValue(format!(
                "{key} must be a valid non-negative integer, got '{value_str}': {e}"
            ))
        }),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let media_api_key = non_empty(vars, "CC_MEDIA_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("CC_MEDIA_API_KEY".to_string()))?;

        let media_api_secret = SecretString::from(
            non_empty(vars, "CC_MEDIA_API_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("CC_MEDIA_API_SECRET".to_string()))?,
        );

        if media_api_secret.expose_secret().len() < MIN_MEDIA_SECRET_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "CC_MEDIA_API_SECRET must be at least {MIN_MEDIA_SECRET_BYTES} bytes"
            )));
        }

        let bind_address = vars
            .get("CC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let media_url = non_empty(vars, "CC_MEDIA_URL");

        let token_ttl_seconds: u64 =
            parse_var(vars, "CC_TOKEN_TTL_SECONDS", DEFAULT_TOKEN_TTL_SECONDS)?;
        if token_ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_TOKEN_TTL_SECONDS must be greater than zero".to_string(),
            ));
        }

        let database_url = non_empty(vars, "DATABASE_URL").map(SecretString::from);

        let round_duration_seconds: u64 = parse_var(
            vars,
            "CC_ROUND_DURATION_SECONDS",
            DEFAULT_ROUND_DURATION_SECONDS,
        )?;
        if round_duration_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_ROUND_DURATION_SECONDS must be greater than zero".to_string(),
            ));
        }

        let distraction_penalty: u8 =
            parse_var(vars, "CC_DISTRACTION_PENALTY", DEFAULT_DISTRACTION_PENALTY)?;
        if distraction_penalty > 100 {
            return Err(ConfigError::InvalidValue(format!(
                "CC_DISTRACTION_PENALTY must not exceed 100, got {distraction_penalty}"
            )));
        }

        let trigger_phrase = non_empty(vars, "CC_TRIGGER_PHRASE")
            .unwrap_or_else(|| DEFAULT_TRIGGER_PHRASE.to_string())
            .to_lowercase();

        let voice_cooldown_ms: u64 =
            parse_var(vars, "CC_VOICE_COOLDOWN_MS", DEFAULT_VOICE_COOLDOWN_MS)?;

        let voice_restart_delay_ms: u64 = parse_var(
            vars,
            "CC_VOICE_RESTART_DELAY_MS",
            DEFAULT_VOICE_RESTART_DELAY_MS,
        )?;

        let ended_room_retention_seconds: u64 = parse_var(
            vars,
            "CC_ENDED_ROOM_RETENTION_SECONDS",
            DEFAULT_ENDED_ROOM_RETENTION_SECONDS,
        )?;

        let idle_room_timeout_seconds: u64 = parse_var(
            vars,
            "CC_IDLE_ROOM_TIMEOUT_SECONDS",
            DEFAULT_IDLE_ROOM_TIMEOUT_SECONDS,
        )?;
        if idle_room_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_IDLE_ROOM_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        let max_rooms: usize = parse_var(vars, "CC_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        if max_rooms == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_MAX_ROOMS must be greater than zero".to_string(),
            ));
        }

        let generator_url =
            non_empty(vars, "CC_GENERATOR_URL").unwrap_or_else(|| DEFAULT_GENERATOR_URL.to_string());

        let generator_api_key = non_empty(vars, "CC_GENERATOR_API_KEY").map(SecretString::from);

        let generator_model = non_empty(vars, "CC_GENERATOR_MODEL")
            .unwrap_or_else(|| DEFAULT_GENERATOR_MODEL.to_string());

        let log_json = vars
            .get("CC_LOG_JSON")
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

        Ok(Config {
            bind_address,
            media_api_key,
            media_api_secret,
            media_url,
            token_ttl: Duration::from_secs(token_ttl_seconds),
            database_url,
            round_duration: Duration::from_secs(round_duration_seconds),
            distraction_penalty,
            trigger_phrase,
            voice_cooldown: Duration::from_millis(voice_cooldown_ms),
            voice_restart_delay: Duration::from_millis(voice_restart_delay_ms),
            ended_room_retention: Duration::from_secs(ended_room_retention_seconds),
            idle_room_timeout: Duration::from_secs(idle_room_timeout_seconds),
            max_rooms,
            generator_url,
            generator_api_key,
            generator_model,
            log_json,
        })
    }
}
