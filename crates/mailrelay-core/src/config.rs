//! Relay configuration: settings file, environment overrides, validation.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::strategy::FallbackPolicy;

/// Settings file read when `MAILRELAY_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "appsettings.json";

/// Name announced in EHLO when none is configured.
pub const DEFAULT_HELO_NAME: &str = "localhost";

/// Environment variable naming the settings file.
pub const CONFIG_PATH_VAR: &str = "MAILRELAY_CONFIG";

/// Credentials and connection settings for the upstream mail host.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Mail host name.
    pub host: String,
    /// Account user name.
    pub username: String,
    /// Account password. Redacted in `Debug` output.
    pub password: SecretString,
    /// Name announced in EHLO.
    pub helo_name: String,
    /// Which connection failures fall back to the next strategy.
    pub fallback: FallbackPolicy,
}

impl RelayConfig {
    /// Creates a configuration with the default EHLO name and fallback policy.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: SecretString::new(password.into()),
            helo_name: DEFAULT_HELO_NAME.to_string(),
            fallback: FallbackPolicy::default(),
        }
    }

    /// Returns the password.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Loads configuration from the settings file and process environment.
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::from_sources`].
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_VAR)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
        Self::from_sources(Some(&path), |key| std::env::var(key).ok())
    }

    /// Builds configuration from an optional settings file, overridden by
    /// values from `env`.
    ///
    /// A settings file that does not exist is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] for an
    /// unreadable or malformed file, and [`ConfigError::Invalid`] listing
    /// every missing or bad value.
    pub fn from_sources<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match path {
            Some(path) => Settings::read(path)?,
            None => Settings::default(),
        };
        settings.apply_env(env);
        settings.validate()
    }
}

/// Raw settings as they appear in the JSON file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Settings {
    email_host: Option<String>,
    #[serde(rename = "EmailUserName")]
    email_username: Option<String>,
    email_password: Option<String>,
    helo_name: Option<String>,
    fallback_policy: Option<String>,
}

impl Settings {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "settings file not found, using environment only");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields = [
            ("EMAIL_HOST", &mut self.email_host),
            ("EMAIL_USERNAME", &mut self.email_username),
            ("EMAIL_PASSWORD", &mut self.email_password),
            ("EMAIL_HELO_NAME", &mut self.helo_name),
            ("EMAIL_FALLBACK_POLICY", &mut self.fallback_policy),
        ];
        for (key, slot) in fields {
            if let Some(value) = env(key) {
                *slot = Some(value);
            }
        }
    }

    fn validate(self) -> Result<RelayConfig, ConfigError> {
        let mut errors = Vec::new();

        let host = self.email_host.unwrap_or_default().trim().to_string();
        if host.is_empty() {
            errors.push(ValidationError::EmptyHost);
        }
        let username = self.email_username.unwrap_or_default();
        if username.trim().is_empty() {
            errors.push(ValidationError::EmptyUsername);
        }
        let password = self.email_password.unwrap_or_default();
        if password.is_empty() {
            errors.push(ValidationError::EmptyPassword);
        }
        let helo_name = self
            .helo_name
            .map_or_else(|| DEFAULT_HELO_NAME.to_string(), |name| name.trim().to_string());
        if helo_name.is_empty() {
            errors.push(ValidationError::EmptyHeloName);
        }
        let fallback = match self.fallback_policy {
            None => FallbackPolicy::default(),
            Some(raw) => raw.parse::<FallbackPolicy>().unwrap_or_else(|raw| {
                errors.push(ValidationError::UnknownFallbackPolicy(raw));
                FallbackPolicy::default()
            }),
        };

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        Ok(RelayConfig {
            host,
            username,
            password: SecretString::new(password),
            helo_name,
            fallback,
        })
    }
}

/// One problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Mail host is missing or blank.
    EmptyHost,
    /// User name is missing or blank.
    EmptyUsername,
    /// Password is missing.
    EmptyPassword,
    /// EHLO name was set to a blank value.
    EmptyHeloName,
    /// Fallback policy is not recognised.
    UnknownFallbackPolicy(String),
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptyHost => "SMTP server is required",
            Self::EmptyUsername => "SMTP username is required",
            Self::EmptyPassword => "SMTP password is required",
            Self::EmptyHeloName => "EHLO name must not be blank",
            Self::UnknownFallbackPolicy(_) => {
                "fallback policy must be ProtocolRefusal or AnyFailure"
            }
        }
    }

    /// Get the setting this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyHost => "EmailHost",
            Self::EmptyUsername => "EmailUserName",
            Self::EmptyPassword => "EmailPassword",
            Self::EmptyHeloName => "HeloName",
            Self::UnknownFallbackPolicy(_) => "FallbackPolicy",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownFallbackPolicy(raw) => write!(f, "{} (got {raw:?})", self.message()),
            _ => write!(f, "{}", self.message()),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}", path.display())]
    Read {
        /// Settings file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for the expected shape.
    #[error("malformed settings file {}", path.display())]
    Parse {
        /// Settings file.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// One or more values are missing or invalid.
    #[error("invalid configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|err| format!("{}: {err}", err.field()))
        .collect::<Vec<_>>()
        .join("; ")
}
