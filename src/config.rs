//! Configuration of the session lifecycle and CSRF protection.
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [session]
//! cookie_name = "session"
//! regenerate_after_secs = 1800
//!
//! [csrf]
//! token_ttl_secs = 3600
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Durations above this many seconds are clamped, which keeps timestamp arithmetic in range.
const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Cookies shorter than this carry too little entropy.
const MIN_COOKIE_LENGTH: usize = 32;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Session lifecycle settings.
    pub session: SessionConfig,
    /// CSRF token settings.
    pub csrf: CsrfConfig,
}

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie.
    pub cookie_name: String,
    /// Number of characters of a generated cookie value.
    pub cookie_length: usize,
    /// Age after which a session id is rotated automatically.
    pub regenerate_after_secs: u64,
    /// How long a rotated-out session id is still honoured.
    pub regeneration_grace_secs: u64,
    /// Time after which an untouched session record may be forgotten by the store.
    pub record_ttl_secs: u64,
}

/// CSRF token settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Lifetime of an issued token.
    pub token_ttl_secs: u64,
    /// Name of the form field carrying the per-form key.
    pub key_field: String,
    /// Name of the form field carrying the token.
    pub token_field: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            cookie_length: 64,
            regenerate_after_secs: 30 * 60,
            regeneration_grace_secs: 5 * 60,
            record_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 60 * 60,
            key_field: "csrf_key".to_string(),
            token_field: "csrf_token".to_string(),
        }
    }
}

impl SessionConfig {
    /// Age after which a session id is rotated automatically.
    pub fn regenerate_after(&self) -> Duration {
        seconds(self.regenerate_after_secs)
    }

    /// How long a rotated-out session id is still honoured.
    pub fn regeneration_grace(&self) -> Duration {
        seconds(self.regeneration_grace_secs)
    }

    /// Time after which an untouched session record may be forgotten.
    pub fn record_ttl(&self) -> Duration {
        seconds(self.record_ttl_secs)
    }
}

impl CsrfConfig {
    /// Lifetime of an issued token.
    pub fn token_ttl(&self) -> Duration {
        seconds(self.token_ttl_secs)
    }
}

fn seconds(secs: u64) -> Duration {
    // Lossless after clamping.
    Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML or does not match the schema.
    #[error("could not parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// The values are inconsistent.
    #[error("invalid configuration: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

/// A semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A duration that must be positive is zero.
    ZeroDuration {
        /// The offending field.
        field: &'static str,
    },
    /// A name that must be set is empty.
    EmptyName {
        /// The offending field.
        field: &'static str,
    },
    /// The cookie length gives too little entropy.
    CookieTooShort {
        /// The configured length.
        length: usize,
    },
    /// The grace window is not shorter than the rotation interval.
    GraceNotShorterThanRotation,
    /// The key and token fields share one name.
    CsrfFieldsCollide,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroDuration { field } => write!(f, "{field} must be greater than zero"),
            Self::EmptyName { field } => write!(f, "{field} must not be empty"),
            Self::CookieTooShort { length } => write!(
                f,
                "cookie_length is {length}, but must be at least {MIN_COOKIE_LENGTH}"
            ),
            Self::GraceNotShorterThanRotation => write!(
                f,
                "regeneration_grace_secs must be shorter than regenerate_after_secs"
            ),
            Self::CsrfFieldsCollide => write!(f, "key_field and token_field must differ"),
        }
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Checks the configuration for semantic problems, returning all of them.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        self.session.collect_errors(&mut errors);
        self.csrf.collect_errors(&mut errors);
        into_result(errors)
    }
}

impl SessionConfig {
    /// Checks the session settings for semantic problems, returning all of them.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        into_result(errors)
    }

    fn collect_errors(&self, errors: &mut Vec<ValidationError>) {
        for (field, value) in [
            ("regenerate_after_secs", self.regenerate_after_secs),
            ("regeneration_grace_secs", self.regeneration_grace_secs),
            ("record_ttl_secs", self.record_ttl_secs),
        ] {
            if value == 0 {
                errors.push(ValidationError::ZeroDuration { field });
            }
        }
        if self.cookie_name.trim().is_empty() {
            errors.push(ValidationError::EmptyName {
                field: "cookie_name",
            });
        }
        if self.cookie_length < MIN_COOKIE_LENGTH {
            errors.push(ValidationError::CookieTooShort {
                length: self.cookie_length,
            });
        }
        if self.regeneration_grace_secs >= self.regenerate_after_secs {
            errors.push(ValidationError::GraceNotShorterThanRotation);
        }
    }
}

impl CsrfConfig {
    /// Checks the CSRF settings for semantic problems, returning all of them.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        into_result(errors)
    }

    fn collect_errors(&self, errors: &mut Vec<ValidationError>) {
        if self.token_ttl_secs == 0 {
            errors.push(ValidationError::ZeroDuration {
                field: "token_ttl_secs",
            });
        }
        for (field, value) in [
            ("key_field", &self.key_field),
            ("token_field", &self.token_field),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::EmptyName { field });
            }
        }
        if self.key_field == self.token_field {
            errors.push(ValidationError::CsrfFieldsCollide);
        }
    }
}

fn into_result(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
