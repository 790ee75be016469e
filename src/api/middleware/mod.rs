//! API Middleware
//!
//! Contains middleware for:
//! - HTTP metrics recording
//! - Basic authentication in front of the scrape endpoint

pub mod basic_auth;
pub mod metrics;

pub use basic_auth::{require_basic_auth, Accounts, AuthUser};
pub use metrics::{
    approximate_request_size, default_url_formatter, track_requests, RequestLabels,
    RequestMetrics, UrlFormatter,
};
