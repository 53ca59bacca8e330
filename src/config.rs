//! Forwarding configuration.
//!
//! One `ForwardingConfig` is loaded at startup and kept as an immutable
//! template; every invocation works on its own clone so per-message
//! adjustments (dynamic key prefix) never leak between invocations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable naming the JSON config file to load.
pub const CONFIG_FILE_ENV: &str = "MAIL_RELAY_CONFIG";

/// Forwarding configuration.
///
/// Rule maps use normalized (lowercased) keys:
/// - `forward_mapping`: exact address (`info@example.com`), domain
///   (`@example.com`), bare mailbox name (`info`), or the catch-all `@`,
///   each mapping to a list of destination addresses.
/// - `forward_domain_mapping`: domain (`@example.com`) mapping to a list
///   of replacement domains; the mailbox name is preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Verified sender substituted into the From header. When unset, the
    /// original From display text is kept (de-addressed) and the matched
    /// recipient becomes the sending address.
    pub from_email: Option<String>,
    /// Prepended verbatim to the Subject header. Empty means no prefix.
    pub subject_prefix: String,
    /// When set, replaces the To header entirely.
    pub to_email_override: Option<String>,
    /// Storage bucket holding received raw messages.
    pub email_bucket: String,
    /// Key prefix inside the bucket; the message id is appended to it.
    pub email_key_prefix: String,
    /// Derive the key prefix from the (single) recipient instead of using
    /// `email_key_prefix` as-is.
    pub dynamic_key_prefix: bool,
    /// Strip `+tag` suffixes from recipient mailbox names before rule
    /// matching.
    pub allow_plus_sign: bool,
    /// Layered forwarding rules, narrowest match wins.
    pub forward_mapping: HashMap<String, Vec<String>>,
    /// Domain rewrite rules, applied when no `forward_mapping` rule
    /// matches.
    pub forward_domain_mapping: HashMap<String, Vec<String>>,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            from_email: None,
            subject_prefix: String::new(),
            to_email_override: None,
            email_bucket: "mail".to_string(),
            email_key_prefix: String::new(),
            dynamic_key_prefix: false,
            allow_plus_sign: true,
            forward_mapping: HashMap::new(),
            forward_domain_mapping: HashMap::new(),
        }
    }
}

impl ForwardingConfig {
    /// Load the config file named by `MAIL_RELAY_CONFIG` (defaults built
    /// in when unset), then apply environment overrides on top.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a JSON config file. Unknown fields are ignored, absent
    /// fields fall back to their defaults.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("MAIL_RELAY_FROM_EMAIL") {
            self.from_email = Some(v);
        }
        if let Ok(v) = std::env::var("MAIL_RELAY_SUBJECT_PREFIX") {
            self.subject_prefix = v;
        }
        if let Ok(v) = std::env::var("MAIL_RELAY_TO_OVERRIDE") {
            self.to_email_override = Some(v);
        }
        if let Ok(v) = std::env::var("MAIL_RELAY_BUCKET") {
            self.email_bucket = v;
        }
        if let Ok(v) = std::env::var("MAIL_RELAY_KEY_PREFIX") {
            self.email_key_prefix = v;
        }
        if let Ok(v) = std::env::var("MAIL_RELAY_DYNAMIC_KEY_PREFIX") {
            self.dynamic_key_prefix = parse_bool("MAIL_RELAY_DYNAMIC_KEY_PREFIX", &v)?;
        }
        if let Ok(v) = std::env::var("MAIL_RELAY_ALLOW_PLUS_SIGN") {
            self.allow_plus_sign = parse_bool("MAIL_RELAY_ALLOW_PLUS_SIGN", &v)?;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}
