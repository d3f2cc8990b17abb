//! Error types shared by the Kea client, the collector and the sinks
//!
//! Errors are split by who is at fault:
//! - `KeaError`: the Control Agent could not be reached, did not speak the
//!   Control Agent protocol, or served a configuration we cannot read
//! - `SinkError`: metrics could not be handed to the time-series backend
//! - `CollectionError`: a collection cycle was aborted and emitted nothing

use thiserror::Error;

/// Coarse classification of a `KeaError`, used when deciding how to log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeaErrorKind {
    Transport,
    Protocol,
    MalformedConfig,
}

#[derive(Debug, Error)]
pub enum KeaError {
    /// Connection refused, TLS failure, timeout...
    #[error("HTTP error while querying Kea Control Agent at {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} most likely does not point at a Kea Control Agent (expected JSON, got {body:?})")]
    NotJson { url: String, body: String },
    #[error("{url} most likely does not point at a Kea Control Agent: {detail}")]
    Protocol { url: String, detail: String },
    #[error("malformed Kea DHCP configuration: {0}")]
    MalformedConfig(String),
}

impl KeaError {
    pub fn kind(&self) -> KeaErrorKind {
        match self {
            KeaError::Transport { .. } | KeaError::NotJson { .. } => KeaErrorKind::Transport,
            KeaError::Protocol { .. } => KeaErrorKind::Protocol,
            KeaError::MalformedConfig(_) => KeaErrorKind::MalformedConfig,
        }
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == KeaErrorKind::Transport
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("carbon I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out talking to carbon at {0}")]
    Timeout(String),
}

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error(transparent)]
    Kea(#[from] KeaError),
    #[error("Kea refused to hand out its configuration (result {result}): {text}")]
    ConfigUnavailable { result: i64, text: String },
    #[error("Kea configuration contains no usable subnets")]
    NoSubnets,
    #[error("failed to emit metrics: {0}")]
    Sink(#[from] SinkError),
}
