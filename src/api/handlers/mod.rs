pub mod metrics;

pub use metrics::{metrics_handler, CONTENT_TYPE};
