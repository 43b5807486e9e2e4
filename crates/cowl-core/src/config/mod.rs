//! Configuration parsing and management.
//!
//! A `cowl.toml` file configures logging, script fetching, and a set of named
//! embedding contexts with preset labels:
//!
//! ```toml
//! [log]
//! level = "info"
//! format = "json"
//!
//! [fetch]
//! allowed_schemes = ["https"]
//! cache_capacity = 64
//!
//! [contexts.mail]
//! origin = "https://mail.example"
//! privacy = "(https://mail.example)"
//! privacy_clearance = "(https://mail.example) & (https://contacts.example)"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::{DEFAULT_CACHE_CAPACITY, MAX_CLONE_BYTES};
use crate::label::{Label, Principal};
use crate::privilege::Privilege;
use crate::sandbox::ContextPolicy;

/// Schemes scripts may ever be fetched from.
const FETCHABLE_SCHEMES: &[&str] = &["http", "https"];

/// Log levels accepted by `[log] level`.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CowlConfig {
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,

    /// Script fetching configuration.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Named embedding contexts.
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextConfig>,
}

impl CowlConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails [`CowlConfig::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first invalid entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate()?;
        self.fetch.validate()?;
        for (name, context) in &self.contexts {
            context
                .to_policy()
                .map_err(|e| ConfigError::Validation(format!("contexts.{name}: {e}")))?;
        }
        Ok(())
    }

    /// Looks up a named context.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if no context has that name.
    pub fn context(&self, name: &str) -> Result<&ContextConfig, ConfigError> {
        self.contexts
            .get(name)
            .ok_or_else(|| ConfigError::Validation(format!("no context named '{name}'")))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter level, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if LOG_LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(ConfigError::Validation(format!(
                "log.level '{}' is not one of {}",
                self.level,
                LOG_LEVELS.join(", ")
            )))
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Script fetching configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// URL schemes `schedule_uri` and `import` may fetch from.
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,

    /// Maximum number of compiled units kept in the script cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Largest value, in encoded bytes, a structured clone may carry.
    #[serde(default = "default_max_clone_bytes")]
    pub max_clone_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: default_allowed_schemes(),
            cache_capacity: default_cache_capacity(),
            max_clone_bytes: default_max_clone_bytes(),
        }
    }
}

impl FetchConfig {
    /// Whether `url` uses one of the allowed schemes.
    #[must_use]
    pub fn allows(&self, url: &str) -> bool {
        url.split_once("://").is_some_and(|(scheme, _)| {
            self.allowed_schemes
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(scheme))
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self
            .allowed_schemes
            .iter()
            .find(|s| !FETCHABLE_SCHEMES.contains(&s.to_ascii_lowercase().as_str()))
        {
            return Err(ConfigError::Validation(format!(
                "fetch.allowed_schemes: '{bad}' is not fetchable, only http and https are"
            )));
        }
        if self.max_clone_bytes == 0 {
            return Err(ConfigError::Validation(
                "fetch.max_clone_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_allowed_schemes() -> Vec<String> {
    FETCHABLE_SCHEMES.iter().map(ToString::to_string).collect()
}

const fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

const fn default_max_clone_bytes() -> usize {
    MAX_CLONE_BYTES
}

/// A named embedding context with preset labels.
///
/// Labels are label expressions (`public`, `(a | b) & (c)`). Unset labels
/// default to public; unset clearances are unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// The context's origin URL, or a plain principal name.
    pub origin: String,

    /// Current privacy label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<String>,

    /// Current trust label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<String>,

    /// Privacy clearance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_clearance: Option<String>,

    /// Trust clearance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_clearance: Option<String>,

    /// Privileges owned in addition to the origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileges: Option<String>,
}

impl ContextConfig {
    /// The origin principal.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the origin is neither an
    /// `http(s)` URL nor a valid principal name.
    pub fn origin_principal(&self) -> Result<Principal, ConfigError> {
        let parsed = if self.origin.contains("://") {
            Principal::origin(&self.origin)
        } else {
            Principal::new(&self.origin)
        };
        parsed.map_err(|e| ConfigError::Validation(e.to_string()))
    }

    /// Builds the sandbox-mode context policy this entry describes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a label does not parse or a
    /// current label lies outside its clearance.
    pub fn to_policy(&self) -> Result<ContextPolicy, ConfigError> {
        let origin = self.origin_principal()?;
        let privacy = parse_or(self.privacy.as_deref(), "privacy")?.unwrap_or_default();
        let trust = parse_or(self.trust.as_deref(), "trust")?.unwrap_or_default();
        let privacy_clearance = parse_or(self.privacy_clearance.as_deref(), "privacy_clearance")?;
        let trust_clearance = parse_or(self.trust_clearance.as_deref(), "trust_clearance")?;
        let privileges = parse_or(self.privileges.as_deref(), "privileges")?
            .map(Privilege::from_label)
            .unwrap_or_default();

        ContextPolicy::configured(
            origin,
            privacy,
            trust,
            privacy_clearance,
            trust_clearance,
            privileges,
        )
        .map_err(|e| ConfigError::Validation(e.to_string()))
    }
}

fn parse_or(expr: Option<&str>, field: &str) -> Result<Option<Label>, ConfigError> {
    expr.map(|e| {
        e.parse::<Label>()
            .map_err(|err| ConfigError::Validation(format!("{field}: {err}")))
    })
    .transpose()
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
