//! Prometheus instrumentation for axum services.
//!
//! - [`Registry`]: typed request metrics on a non-global recorder, plus an
//!   uptime counter ticking once per second
//! - [`track_requests`]: middleware recording count, duration and sizes per request
//! - scrape endpoint, embedded or on its own listener, optionally behind Basic auth
//! - [`PushReporter`]: periodic push of the scraped text to a push gateway

pub mod api;
pub mod config;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod prometheus;
pub mod services;

pub use api::middleware::{
    approximate_request_size, default_url_formatter, track_requests, Accounts, AuthUser,
    RequestLabels, RequestMetrics, UrlFormatter,
};
pub use error::MetricsError;
pub use logger::{Logger, TracingLogger};
pub use metrics::{
    CollectorHandle, Gatherers, MetricDefinition, MetricKind, MetricsSource, Registry,
    StandardCollectors,
};
pub use prometheus::Prometheus;
pub use services::{PushGatewayConfig, PushReporter};
