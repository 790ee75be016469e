pub mod push_gateway;

pub use push_gateway::{resolve_hostname, PushGatewayConfig, PushReporter, DEFAULT_JOB};
