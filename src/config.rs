//! Agent configuration
//!
//! Read from a TOML file; every section and field falls back to its default
//! so an empty file (or no file at all) yields a runnable local agent.

use edge_shared::{defaults, AccelerationInfo};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "EDGE_AGENT_CONFIG";
/// Environment override for the shadow update interval, in milliseconds
pub const SHADOW_INTERVAL_ENV: &str = "EDGE_AGENT_SHADOW_UPDATE_MS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing TOML config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub identity: IdentityConfig,
    pub transport: TransportConfig,
    pub shadow: ShadowConfig,
    pub engine: EngineConfig,
    pub deploy: DeployConfig,
    pub device: DeviceConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Thing name, also used as client token
    pub thing_name: String,
    /// Prefix of the pre-signed URL topics
    pub topic_prefix: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            thing_name: "edge-001".into(),
            topic_prefix: "edge".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// In-process broker, nothing leaves the host
    #[default]
    Memory,
    /// Length-prefixed frames to a relay over TCP
    Tcp,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub relay_address: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Memory,
            relay_address: "127.0.0.1:1883".into(),
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            connect_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShadowConfig {
    pub update_interval_ms: u64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: defaults::SHADOW_UPDATE_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub supported_api_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            supported_api_version: defaults::SUPPORTED_API_VERSION.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    pub sign_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            sign_timeout_ms: defaults::SIGN_URL_TIMEOUT_MS,
            fetch_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub acceleration: Option<AccelerationInfo>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl AgentConfig {
    pub fn shadow_update_interval(&self) -> Duration {
        Duration::from_millis(self.shadow.update_interval_ms)
    }

    pub fn sign_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy.sign_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy.fetch_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.thing_name.is_empty() {
            return Err(ConfigError::Invalid("identity.thing_name must not be empty".into()));
        }
        if self.shadow.update_interval_ms == 0 {
            return Err(ConfigError::Invalid("shadow.update_interval_ms must be positive".into()));
        }
        if self.engine.supported_api_version.is_empty() {
            return Err(ConfigError::Invalid("engine.supported_api_version must not be empty".into()));
        }
        Ok(())
    }
}

/// Parse a configuration document
pub fn from_str(contents: &str, origin: &Path) -> Result<AgentConfig, ConfigError> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })
}

/// Load the configuration, applying environment overrides
///
/// Without a path the defaults are used.
pub fn load(path: Option<&Path>) -> Result<AgentConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            from_str(&contents, path)?
        }
        None => AgentConfig::default(),
    };

    apply_env(&mut config, std::env::var(SHADOW_INTERVAL_ENV).ok())?;
    config.validate()?;
    Ok(config)
}

fn apply_env(config: &mut AgentConfig, shadow_interval: Option<String>) -> Result<(), ConfigError> {
    if let Some(value) = shadow_interval {
        config.shadow.update_interval_ms = value.trim().parse().map_err(|_| ConfigError::Env {
            name: SHADOW_INTERVAL_ENV,
            value,
        })?;
    }
    Ok(())
}

/// Config path from the first argument, then the environment
pub fn resolve_path(arg: Option<String>) -> Option<PathBuf> {
    arg.or_else(|| std::env::var(CONFIG_ENV).ok())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}
