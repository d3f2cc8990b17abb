//! Kea Control Agent protocol
//!
//! ```text
//!          HTTP POST (json)                    IPC
//! keastat <----------------> Kea Control Agent <=====> kea-dhcp4 / kea-dhcp6
//! ```
//!
//! - `client`: command transport and response envelope validation
//! - `config`: subnet discovery from a `config-get` answer
//!
//! No hook library is assumed on the Control Agent side, only the built-in
//! `config-get` and `statistic-get` commands (Kea >= 2.2).

pub mod client;
pub mod config;

pub use client::{ControlAgentClient, ControlAgentResponse};
pub use config::{ConfigDrift, ConfigSnapshot, Pool, Subnet};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result codes of a Control Agent response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeaStatus {
    Success = 0,
    /// General failure
    Error = 1,
    Unsupported = 2,
    /// Successful operation that produced no results
    Empty = 3,
    /// Command arguments conflict with the server state
    Conflict = 4,
}

impl KeaStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(KeaStatus::Success),
            1 => Some(KeaStatus::Error),
            2 => Some(KeaStatus::Unsupported),
            3 => Some(KeaStatus::Empty),
            4 => Some(KeaStatus::Conflict),
            _ => None,
        }
    }
}

/// IP version of a Kea DHCP server. Doubles as the `service` target of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum IpVersion {
    V4,
    V6,
}

/// Version specific key names used in Kea configurations and commands.
#[derive(Debug)]
pub(crate) struct VersionKeys {
    pub(crate) config_root: &'static str,
    pub(crate) subnets: &'static str,
    pub(crate) service: &'static str,
}

static VERSION_KEYS: [(IpVersion, VersionKeys); 2] = [
    (
        IpVersion::V4,
        VersionKeys { config_root: "Dhcp4", subnets: "subnet4", service: "dhcp4" },
    ),
    (
        IpVersion::V6,
        VersionKeys { config_root: "Dhcp6", subnets: "subnet6", service: "dhcp6" },
    ),
];

impl IpVersion {
    pub(crate) fn keys(self) -> &'static VersionKeys {
        match self {
            IpVersion::V4 => &VERSION_KEYS[0].1,
            IpVersion::V6 => &VERSION_KEYS[1].1,
        }
    }

    /// Version whose configuration lives under `root` (`"Dhcp4"` / `"Dhcp6"`).
    pub fn from_config_root(root: &str) -> Option<Self> {
        VERSION_KEYS
            .iter()
            .find(|(_, keys)| keys.config_root == root)
            .map(|(version, _)| *version)
    }

    pub fn service(self) -> &'static str {
        self.keys().service
    }

    pub fn number(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

impl TryFrom<u8> for IpVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            other => Err(format!("unsupported DHCP version {other}, expected 4 or 6")),
        }
    }
}

impl From<IpVersion> for u8 {
    fn from(version: IpVersion) -> u8 {
        version.number()
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DHCPv{}", self.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_lookup_table() {
        assert_eq!(IpVersion::V4.keys().subnets, "subnet4");
        assert_eq!(IpVersion::V6.keys().subnets, "subnet6");
        assert_eq!(IpVersion::V6.service(), "dhcp6");
        assert_eq!(IpVersion::from_config_root("Dhcp4"), Some(IpVersion::V4));
        assert_eq!(IpVersion::from_config_root("Dhcp6"), Some(IpVersion::V6));
        assert_eq!(IpVersion::from_config_root("DhcpDdns"), None);
    }

    #[test]
    fn test_keys_belong_to_their_version() {
        for version in [IpVersion::V4, IpVersion::V6] {
            assert_eq!(IpVersion::from_config_root(version.keys().config_root), Some(version));
        }
        assert_eq!(IpVersion::V4.service(), "dhcp4");
    }

    #[test]
    fn test_version_from_number() {
        assert_eq!(IpVersion::try_from(4), Ok(IpVersion::V4));
        assert_eq!(IpVersion::try_from(6), Ok(IpVersion::V6));
        assert!(IpVersion::try_from(5).is_err());
        assert_eq!(u8::from(IpVersion::V6), 6);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(KeaStatus::from_code(0), Some(KeaStatus::Success));
        assert_eq!(KeaStatus::from_code(3), Some(KeaStatus::Empty));
        assert_eq!(KeaStatus::from_code(4), Some(KeaStatus::Conflict));
        assert_eq!(KeaStatus::from_code(-1), None);
    }
}
