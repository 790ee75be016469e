//! Error types for the metrics shim.
//!
//! None of these ever abort a request: registration problems are logged and
//! skipped, push failures are logged and retried on the next tick.

use crate::metrics::MetricKind;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("unknown metric kind: {0}")]
    UnknownKind(String),

    #[error("metric {id} has an empty name")]
    InvalidName { id: String },

    #[error("metric {name} is a {kind} and cannot carry labels {labels:?}")]
    UnexpectedLabels {
        name: String,
        kind: MetricKind,
        labels: Vec<String>,
    },

    #[error("{name} couldn't be registered: a metric with the same name is already registered")]
    DuplicateRegistration { name: String },

    #[error("{name} expects {expected} label values, got {got}")]
    LabelCardinality {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{url} answered with status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("invalid listen address {address}: {source}")]
    InvalidListenAddress {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
