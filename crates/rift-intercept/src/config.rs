//! Configuration for an interception state.

use crate::registry::{HostMatcher, NetConnectPolicy};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const ENV_ENABLED: &str = "RIFT_INTERCEPT_ENABLED";
pub const ENV_ALLOW_NET: &str = "RIFT_INTERCEPT_ALLOW_NET";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid allowed host pattern '{pattern}': {reason}")]
    InvalidHostPattern { pattern: String, reason: String },
    #[error("invalid boolean '{value}' for {name}")]
    InvalidBool { name: String, value: String },
}

/// Settings applied when an [`InterceptionState`](crate::InterceptionState)
/// is created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterceptionConfig {
    /// When false every call passes through until `activate` is called.
    pub enabled: bool,

    /// Whether unmatched requests may reach the real network.
    pub allow_real_connections: bool,

    /// Host patterns (regex, matched against `host:port` and `host`) that may
    /// reach the real network even when `allow_real_connections` is false.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_hosts: Vec<String>,

    /// History capacity for interceptors that do not call `remember`.
    pub default_history_cap: usize,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_real_connections: true,
            allowed_hosts: Vec::new(),
            default_history_cap: 0,
        }
    }
}

impl InterceptionConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, anyhow::Error> {
        let config: InterceptionConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pattern in &self.allowed_hosts {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidHostPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Apply `RIFT_INTERCEPT_ENABLED` and `RIFT_INTERCEPT_ALLOW_NET`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_ENABLED) {
            self.enabled = parse_bool(ENV_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_ALLOW_NET) {
            self.allow_real_connections = parse_bool(ENV_ALLOW_NET, &value)?;
        }
        Ok(self)
    }

    /// Initial net-connect policy described by this configuration.
    pub fn net_connect_policy(&self) -> NetConnectPolicy {
        let mut policy = if self.allow_real_connections {
            NetConnectPolicy::allow_all()
        } else {
            NetConnectPolicy::deny_all()
        };
        for pattern in &self.allowed_hosts {
            // validate() rejects bad patterns; anything left is skipped
            if let Ok(matcher) = HostMatcher::pattern(pattern) {
                policy.allow(Some(matcher));
            }
        }
        policy
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
