//! Configuration management
//!
//! Handles:
//! - Kea Control Agent targets to poll
//! - Collector policy (drift handling, statistic fetch concurrency)
//! - Carbon endpoint and metric path layout
//! - Config file lookup (`--config`, `KEASTAT_CONFIG`, OS config dir)

use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::collector::DiscardPolicy;
use crate::kea::IpVersion;

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "KEASTAT_CONFIG";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub poller: PollerConfig,
    pub collector: CollectorConfig,
    pub carbon: CarbonConfig,
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_secs: u64,
    pub max_parallel_targets: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub discard_policy: DiscardPolicy,
    /// `statistic-get` requests in flight per target
    pub statistic_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbonConfig {
    pub host: String,
    pub port: u16,
    /// First component of every metric path
    pub root: String,
    /// Also emit one path per (server, subnet)
    pub per_server_paths: bool,
    pub timeout_secs: u64,
}

/// A Kea Control Agent to collect statistics from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: String,
    pub port: u16,
    #[serde(default = "default_https")]
    pub https: bool,
    #[serde(default = "default_target_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_dhcp_version")]
    pub dhcp_version: IpVersion,
}

fn default_https() -> bool {
    true
}

fn default_target_timeout() -> u64 {
    10
}

fn default_dhcp_version() -> IpVersion {
    IpVersion::V4
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_parallel_targets: 8,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            discard_policy: DiscardPolicy::WholeCycle,
            statistic_concurrency: 1,
        }
    }
}

impl Default for CarbonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2003,
            root: "nav".to_string(),
            per_server_paths: false,
            timeout_secs: 5,
        }
    }
}

impl TargetConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            name: None,
            address: address.into(),
            port,
            https: default_https(),
            timeout_secs: default_target_timeout(),
            dhcp_version: default_dhcp_version(),
        }
    }

    /// Base URL of the Control Agent, e.g. `https://192.0.2.10:8000/`
    pub fn url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        if self.address.parse::<Ipv6Addr>().is_ok() {
            format!("{}://[{}]:{}/", scheme, self.address, self.port)
        } else {
            format!("{}://{}:{}/", scheme, self.address, self.port)
        }
    }

    /// Name used in logs
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}:{}", self.address, self.port),
        }
    }
}

impl AgentConfig {
    /// Load the config file.
    ///
    /// An explicit path (argument or `KEASTAT_CONFIG`) must exist. The OS
    /// specific default location falls back to defaults when absent.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        let path = match explicit {
            Some(path) => path,
            None => match Self::config_file_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::info!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SettingsError::Io { path: path.clone(), source })?;
        let config: AgentConfig = toml::from_str(&content)
            .map_err(|source| SettingsError::Parse { path: path.clone(), source })?;
        config.validate()?;

        tracing::info!("Loaded {} target(s) from {}", config.targets.len(), path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let config: AgentConfig = toml::from_str(content).map_err(|source| SettingsError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// OS specific config file path
    pub fn config_file_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("keastat");
        path.push("config.toml");
        Some(path)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.poller.interval_secs == 0 {
            return Err(SettingsError::Invalid("poller.interval_secs must be at least 1".into()));
        }
        if self.poller.max_parallel_targets == 0 {
            return Err(SettingsError::Invalid(
                "poller.max_parallel_targets must be at least 1".into(),
            ));
        }
        if self.collector.statistic_concurrency == 0 {
            return Err(SettingsError::Invalid(
                "collector.statistic_concurrency must be at least 1".into(),
            ));
        }
        if self.carbon.port == 0 || self.carbon.timeout_secs == 0 {
            return Err(SettingsError::Invalid("carbon port and timeout must be non-zero".into()));
        }
        for target in &self.targets {
            if target.address.trim().is_empty() {
                return Err(SettingsError::Invalid("target with empty address".into()));
            }
            if target.port == 0 {
                return Err(SettingsError::Invalid(format!("target {} has port 0", target.label())));
            }
            if target.timeout_secs == 0 {
                return Err(SettingsError::Invalid(format!(
                    "target {} has a zero timeout",
                    target.label()
                )));
            }
        }
        Ok(())
    }
}
