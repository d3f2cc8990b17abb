//! Carbon plaintext protocol sink
//!
//! One TCP connection per batch, one `<path> <value> <epoch>\n` line per path.

use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{MetricPathScheme, MetricSink};
use crate::config::{CarbonConfig, TargetConfig};
use crate::error::SinkError;
use crate::metrics::DhcpMetric;

#[derive(Debug, Clone)]
pub struct CarbonSink {
    host: String,
    port: u16,
    timeout: Duration,
    scheme: MetricPathScheme,
    per_server_paths: bool,
}

impl CarbonSink {
    pub fn new(host: impl Into<String>, port: u16, scheme: MetricPathScheme) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(5),
            scheme,
            per_server_paths: false,
        }
    }

    pub fn from_config(config: &CarbonConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: Duration::from_secs(config.timeout_secs),
            scheme: MetricPathScheme::new(config.root.clone()),
            per_server_paths: config.per_server_paths,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sink for the metrics of one target. Adds the per-server path when
    /// enabled.
    pub fn for_target(&self, target: &TargetConfig) -> Self {
        let mut sink = self.clone();
        if self.per_server_paths {
            sink.scheme = self.scheme.clone().with_server(&target.address, target.port);
        }
        sink
    }

    /// Render metrics as carbon plaintext lines.
    pub fn format_lines(&self, metrics: &[DhcpMetric]) -> String {
        let mut lines = String::new();
        for metric in metrics {
            let epoch = metric.timestamp.timestamp();
            for path in self.scheme.paths(metric) {
                lines.push_str(&format!("{} {} {}\n", path, metric.value, epoch));
            }
        }
        lines
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn send(&self, payload: String) -> Result<(), SinkError> {
        let endpoint = self.endpoint();
        let mut stream = timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| SinkError::Timeout(endpoint.clone()))??;

        timeout(self.timeout, async {
            stream.write_all(payload.as_bytes()).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| SinkError::Timeout(endpoint.clone()))??;

        debug!("Sent {} bytes to carbon at {}", payload.len(), endpoint);
        Ok(())
    }
}

impl MetricSink for CarbonSink {
    async fn emit(&mut self, metrics: &[DhcpMetric]) -> Result<(), SinkError> {
        let payload = self.format_lines(metrics);
        if payload.is_empty() {
            return Ok(());
        }
        self.send(payload).await
    }
}
