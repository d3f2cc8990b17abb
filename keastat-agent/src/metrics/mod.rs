//! DHCP subnet metrics
//!
//! Provides:
//! - The tracked Kea statistics and the metric key each one maps to
//! - Parsing of Kea statistic samples (`[value, "timestamp"]`)
//! - `DhcpMetric`, the unit handed to metric sinks

use chrono::{DateTime, NaiveDateTime, Utc};
use ipnet::IpNet;
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Timestamp layout of Kea statistic samples, always UTC.
const KEA_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Kind of an emitted metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DhcpMetricKey {
    /// Addresses managed by the server
    Total,
    /// Addresses leased to a client
    Assigned,
    /// Addresses the server stopped handing out after a DHCPDECLINE
    Declined,
}

impl DhcpMetricKey {
    pub fn as_str(self) -> &'static str {
        match self {
            DhcpMetricKey::Total => "total",
            DhcpMetricKey::Assigned => "assigned",
            DhcpMetricKey::Declined => "declined",
        }
    }
}

impl fmt::Display for DhcpMetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kea per-subnet statistics fetched on every cycle
pub const TRACKED_STATISTICS: [(&str, DhcpMetricKey); 3] = [
    ("total-addresses", DhcpMetricKey::Total),
    ("assigned-addresses", DhcpMetricKey::Assigned),
    ("declined-addresses", DhcpMetricKey::Declined),
];

/// Name of a per-subnet statistic, e.g. `subnet[1].assigned-addresses`.
pub fn statistic_name(subnet_id: u32, kea_key: &str) -> String {
    format!("subnet[{}].{}", subnet_id, kea_key)
}

/// One sample of one Kea statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticPoint {
    pub timestamp: DateTime<Utc>,
    pub value: i64,
}

impl StatisticPoint {
    /// Parse a `[value, "2024-05-01 10:00:00.123456"]` sample.
    pub fn from_sample(sample: &Value) -> Option<Self> {
        let [value, timestamp] = sample.as_array()?.as_slice() else {
            return None;
        };
        let value = value.as_i64()?;
        let timestamp = parse_timestamp(timestamp.as_str()?)?;
        Some(StatisticPoint { timestamp, value })
    }

    /// Parse the time series of `name` found in `statistic-get` arguments.
    ///
    /// A missing or empty series yields no points; malformed samples are
    /// skipped with a warning.
    pub fn series(arguments: &serde_json::Map<String, Value>, name: &str) -> Vec<Self> {
        let Some(samples) = arguments.get(name).and_then(Value::as_array) else {
            return Vec::new();
        };
        samples
            .iter()
            .filter_map(|sample| {
                let point = Self::from_sample(sample);
                if point.is_none() {
                    warn!("Ignoring malformed sample {} of statistic '{}'", sample, name);
                }
                point
            })
            .collect()
    }
}

/// Parse a Kea statistic timestamp. Kea reports UTC without an offset.
pub fn parse_timestamp(timestamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(timestamp.trim(), KEA_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// A metric ready to be handed to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpMetric {
    pub timestamp: DateTime<Utc>,
    pub subnet_prefix: IpNet,
    pub key: DhcpMetricKey,
    pub value: i64,
}

impl DhcpMetric {
    pub fn new(point: StatisticPoint, subnet_prefix: IpNet, key: DhcpMetricKey) -> Self {
        Self {
            timestamp: point.timestamp,
            subnet_prefix,
            key,
            value: point.value,
        }
    }
}
