use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};
use thiserror::Error;

use crate::platform::PlatformName;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open config file: {0}")]
    Open(String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Process-level settings shared by element definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiniConfig {
    #[serde(default)]
    pub log: LogConfig,

    /// Platform used by definitions that do not name one explicitly.
    #[serde(default)]
    pub platform: PlatformName,

    /// Prop keys ignored when comparing incoming props against the committed ones.
    #[serde(default = "default_volatile_prop_keys")]
    pub volatile_prop_keys: Vec<String>,

    /// Overrides the platform's own policy for skipping equal props.
    #[serde(default)]
    pub skip_equal_props: Option<bool>,

    /// Enables the `DANGER_ZONE_BYPASS_FUNCTION_CALL_WITH_DATA` input key.
    #[serde(default = "default_true")]
    pub allow_data_bypass: bool,

    #[serde(default)]
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            filter: default_log_filter(),
        }
    }
}

/// Static answers for the runtime probe, for hosts that cannot be inspected directly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeConfig {
    /// Globals present in the runtime, e.g. `my` on Alipay or `wx` on WeChat.
    #[serde(default)]
    pub globals: Vec<String>,

    /// Capabilities reported by `canIUse`, e.g. `component2`.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Default for MiniConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            platform: PlatformName::default(),
            volatile_prop_keys: default_volatile_prop_keys(),
            skip_equal_props: None,
            allow_data_bypass: default_true(),
            probe: ProbeConfig::default(),
        }
    }
}

impl MiniConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        from_file(path)
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let file = File::open(path).map_err(|e| ConfigError::Open(e.to_string()))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| ConfigError::Parse(e.to_string()))
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, ConfigError> {
    serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn default_true() -> bool {
    true
}

fn default_log_filter() -> String {
    "minifish=info".to_string()
}

fn default_volatile_prop_keys() -> Vec<String> {
    vec!["$slots".to_string()]
}
