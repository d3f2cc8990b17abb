//! Metric sinks
//!
//! A sink receives the metrics of a cycle once the collector trusts them.
//! `CarbonSink` writes them to a carbon/graphite line receiver,
//! `MemorySink` keeps them in memory.

mod carbon;

pub use carbon::CarbonSink;

use ipnet::IpNet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SinkError;
use crate::metrics::{DhcpMetric, DhcpMetricKey};

/// Destination of trusted metrics
pub trait MetricSink {
    fn emit(&mut self, metrics: &[DhcpMetric]) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Metric sink recording everything it receives. Clones share the records.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    metrics: Arc<Mutex<Vec<DhcpMetric>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> Vec<DhcpMetric> {
        self.records().clone()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn clear(&self) {
        self.records().clear();
    }

    fn records(&self) -> MutexGuard<'_, Vec<DhcpMetric>> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MetricSink for MemorySink {
    async fn emit(&mut self, metrics: &[DhcpMetric]) -> Result<(), SinkError> {
        self.records().extend_from_slice(metrics);
        Ok(())
    }
}

/// Layout of carbon metric paths
///
/// ```text
/// <root>.dhcp.subnets.<prefix>.<key>
/// <root>.dhcp.servers.<address>_<port>.subnets.<prefix>.<key>   (per server)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPathScheme {
    root: String,
    server: Option<String>,
}

impl MetricPathScheme {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into(), server: None }
    }

    /// Also emit a path naming the server the metric came from.
    pub fn with_server(mut self, address: &str, port: u16) -> Self {
        self.server = Some(format!("{}_{}", escape_path_component(address), port));
        self
    }

    pub fn subnet_path(&self, prefix: &IpNet, key: DhcpMetricKey) -> String {
        format!("{}.dhcp.subnets.{}.{}", self.root, escape_path_component(&prefix.to_string()), key)
    }

    pub fn server_path(&self, prefix: &IpNet, key: DhcpMetricKey) -> Option<String> {
        self.server.as_ref().map(|server| {
            format!(
                "{}.dhcp.servers.{}.subnets.{}.{}",
                self.root,
                server,
                escape_path_component(&prefix.to_string()),
                key
            )
        })
    }

    /// Every path a metric is written to
    pub fn paths(&self, metric: &DhcpMetric) -> Vec<String> {
        let mut paths = vec![self.subnet_path(&metric.subnet_prefix, metric.key)];
        paths.extend(self.server_path(&metric.subnet_prefix, metric.key));
        paths
    }
}

/// Make a string usable as a single carbon path component.
pub fn escape_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            '.' | ':' | '/' => '_',
            c => c,
        })
        .collect()
}
