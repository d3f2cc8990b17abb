//! Subnet discovery from a Kea DHCP configuration
//!
//! Only subnet identity matters here: the id Kea uses to name per-subnet
//! statistics and the prefix the statistics are reported against. Subnets are
//! gathered from the top level `subnet4`/`subnet6` list and from every shared
//! network, flattened into one list.

use ipnet::IpNet;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use tracing::warn;

use super::IpVersion;
use crate::error::KeaError;

/// Key Kea >= 2.4 puts next to the DHCP section of a `config-get` answer.
const HASH_KEY: &str = "hash";

/// Address range handed out from a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl Pool {
    /// Parse either `"192.0.2.10 - 192.0.2.20"` or `"192.0.2.64/26"`.
    pub fn parse(pool: &str) -> Option<Self> {
        if let Some((start, end)) = pool.split_once('-') {
            let start = start.trim().parse().ok()?;
            let end = end.trim().parse().ok()?;
            return Some(Pool { start, end });
        }
        let net: IpNet = pool.trim().parse().ok()?;
        Some(Pool { start: net.network(), end: net.broadcast() })
    }
}

/// A subnet managed by a Kea DHCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    /// Either set in the server config or assigned by the server
    pub id: u32,
    pub prefix: IpNet,
    pub pools: Vec<Pool>,
}

impl Subnet {
    fn from_json(entry: &Value, version: IpVersion) -> Option<Self> {
        let id = entry.get("id");
        let prefix = entry.get("subnet");
        let (Some(id), Some(prefix)) = (id, prefix) else {
            warn!("id or prefix missing from a subnet's configuration: {}", entry);
            return None;
        };

        let Some(id) = id.as_u64().and_then(|id| u32::try_from(id).ok()) else {
            warn!("Ignoring subnet with invalid id {}", id);
            return None;
        };
        let Some(prefix) = prefix.as_str().and_then(|p| p.trim().parse::<IpNet>().ok()) else {
            warn!("Ignoring subnet {} with invalid prefix {}", id, prefix);
            return None;
        };
        let family_matches = matches!(
            (version, prefix),
            (IpVersion::V4, IpNet::V4(_)) | (IpVersion::V6, IpNet::V6(_))
        );
        if !family_matches {
            warn!("Ignoring subnet {} ({}) in a {} configuration", id, prefix, version);
            return None;
        }

        let mut pools = Vec::new();
        if let Some(entries) = entry.get("pools").and_then(Value::as_array) {
            for pool in entries {
                match pool.get("pool").and_then(Value::as_str).and_then(Pool::parse) {
                    Some(parsed) => pools.push(parsed),
                    None => warn!("Ignoring unparsable pool {} of subnet {}", pool, id),
                }
            }
        }

        Some(Subnet { id, prefix, pools })
    }
}

/// The subnets of one `config-get` answer.
///
/// Equality only looks at the (id, prefix) pairs, regardless of order, pools
/// or configuration hash.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub ip_version: IpVersion,
    pub subnets: Vec<Subnet>,
    pub config_hash: Option<String>,
}

impl ConfigSnapshot {
    /// Parse a configuration document such as `{"Dhcp4": {...}}`.
    pub fn parse(document: &Value) -> Result<Self, KeaError> {
        match document {
            Value::Object(map) => Self::from_arguments(map),
            other => Err(KeaError::MalformedConfig(format!(
                "expected a JSON object, got {}",
                type_name(other)
            ))),
        }
    }

    /// Parse the `arguments` of a successful `config-get` response.
    pub fn from_arguments(arguments: &Map<String, Value>) -> Result<Self, KeaError> {
        let mut section = None;
        let mut config_hash = None;

        for (key, value) in arguments {
            if let Some(version) = IpVersion::from_config_root(key) {
                if section.is_some() {
                    return Err(KeaError::MalformedConfig(
                        "expected a single Dhcp4 or Dhcp6 configuration, got both".to_string(),
                    ));
                }
                section = Some((version, value));
            } else if key == HASH_KEY && value.is_string() {
                config_hash = value.as_str().map(str::to_string);
            } else {
                return Err(KeaError::MalformedConfig(format!(
                    "unexpected top-level key '{key}'"
                )));
            }
        }

        let Some((ip_version, config)) = section else {
            return Err(KeaError::MalformedConfig(
                "expected a Dhcp4 or Dhcp6 configuration".to_string(),
            ));
        };
        let Value::Object(config) = config else {
            return Err(KeaError::MalformedConfig(format!(
                "{} section is {}, expected an object",
                ip_version.keys().config_root,
                type_name(config)
            )));
        };

        let subnet_key = ip_version.keys().subnets;
        let top_level = config.get(subnet_key).and_then(Value::as_array).into_iter().flatten();
        let shared = config
            .get("shared-networks")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|network| network.get(subnet_key).and_then(Value::as_array))
            .flatten();

        let subnets = top_level
            .chain(shared)
            .filter_map(|entry| Subnet::from_json(entry, ip_version))
            .collect();

        Ok(ConfigSnapshot { ip_version, subnets, config_hash })
    }

    pub fn subnet_set(&self) -> BTreeSet<(u32, IpNet)> {
        self.subnets.iter().map(|s| (s.id, s.prefix)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
    }
}

impl PartialEq for ConfigSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.subnet_set() == other.subnet_set()
    }
}

impl Eq for ConfigSnapshot {}

/// Difference between two snapshots taken around a statistics fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDrift {
    pub added: Vec<(u32, IpNet)>,
    pub removed: Vec<(u32, IpNet)>,
    /// (id, prefix before, prefix after)
    pub reprefixed: Vec<(u32, IpNet, IpNet)>,
}

impl ConfigDrift {
    /// `None` when both snapshots hold the same subnets.
    pub fn between(before: &ConfigSnapshot, after: &ConfigSnapshot) -> Option<Self> {
        let before_set = before.subnet_set();
        let after_set = after.subnet_set();
        if before_set == after_set {
            return None;
        }

        let mut removed: BTreeMap<u32, Vec<IpNet>> = BTreeMap::new();
        for &(id, prefix) in before_set.difference(&after_set) {
            removed.entry(id).or_default().push(prefix);
        }
        let mut added: BTreeMap<u32, Vec<IpNet>> = BTreeMap::new();
        for &(id, prefix) in after_set.difference(&before_set) {
            added.entry(id).or_default().push(prefix);
        }

        let mut drift = ConfigDrift::default();
        for (id, old_prefixes) in removed {
            match added.remove(&id) {
                Some(new_prefixes) if old_prefixes.len() == 1 && new_prefixes.len() == 1 => {
                    drift.reprefixed.push((id, old_prefixes[0], new_prefixes[0]));
                }
                Some(new_prefixes) => {
                    drift.removed.extend(old_prefixes.into_iter().map(|p| (id, p)));
                    drift.added.extend(new_prefixes.into_iter().map(|p| (id, p)));
                }
                None => drift.removed.extend(old_prefixes.into_iter().map(|p| (id, p))),
            }
        }
        for (id, new_prefixes) in added {
            drift.added.extend(new_prefixes.into_iter().map(|p| (id, p)));
        }
        drift.added.sort();
        drift.removed.sort();

        Some(drift)
    }

    /// Whether the subnet kept the same prefix under the same id.
    pub fn is_stable(&self, id: u32, prefix: IpNet) -> bool {
        !self.removed.contains(&(id, prefix))
            && !self.reprefixed.iter().any(|&(drifted, old, _)| drifted == id && old == prefix)
    }
}

impl fmt::Display for ConfigDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("added {}", format_pairs(&self.added)));
        }
        if !self.removed.is_empty() {
            parts.push(format!("removed {}", format_pairs(&self.removed)));
        }
        if !self.reprefixed.is_empty() {
            let moved: Vec<String> = self
                .reprefixed
                .iter()
                .map(|(id, old, new)| format!("subnet[{id}] {old} -> {new}"))
                .collect();
            parts.push(format!("re-prefixed {}", moved.join(", ")));
        }
        write!(f, "{}", parts.join("; "))
    }
}

fn format_pairs(pairs: &[(u32, IpNet)]) -> String {
    pairs
        .iter()
        .map(|(id, prefix)| format!("subnet[{id}] {prefix}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
