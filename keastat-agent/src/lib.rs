//! keastat - Kea DHCP subnet statistics collector
//!
//! Polls Kea Control Agents for per-subnet address statistics and writes
//! them to carbon, dropping any cycle during which the subnet configuration
//! changed.
//!
//! - `kea`: Control Agent client and configuration model
//! - `collector`: the bracketed config/statistics/config collection cycle
//! - `sink`: metric destinations (carbon, memory)
//! - `poller`: periodic collection over all targets
//! - `config`: TOML settings

pub mod collector;
pub mod config;
pub mod error;
pub mod kea;
pub mod metrics;
pub mod poller;
pub mod sink;

pub use collector::{CycleReport, DiscardPolicy, StatisticsCollector};
pub use config::{AgentConfig, SettingsError, TargetConfig};
pub use error::{CollectionError, KeaError, SinkError};
pub use metrics::{DhcpMetric, DhcpMetricKey};
pub use poller::Poller;
pub use sink::{CarbonSink, MemorySink, MetricSink};
