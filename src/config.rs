//! Configuration for the demo server, loaded from `PROM_*` environment
//! variables (a `.env` file is honoured by the binary).

use std::time::Duration;

use serde::Deserialize;

use crate::api::middleware::Accounts;
use crate::error::Result;
use crate::services::{PushGatewayConfig, DEFAULT_JOB};

#[derive(Debug, Clone, Deserialize)]
pub struct ShimConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_subsystem")]
    pub subsystem: String,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    /// Separate listener for the scrape endpoint, e.g. `0.0.0.0:9100`
    #[serde(default)]
    pub listen_address: Option<String>,
    #[serde(default)]
    pub push_gateway_url: Option<String>,
    #[serde(default)]
    pub push_metrics_url: Option<String>,
    #[serde(default = "default_push_interval_secs")]
    pub push_interval_secs: u64,
    #[serde(default = "default_push_job")]
    pub push_job: String,
    #[serde(default)]
    pub basic_auth_user: Option<String>,
    #[serde(default)]
    pub basic_auth_password: Option<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_subsystem() -> String {
    "gin".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_push_interval_secs() -> u64 {
    15
}

fn default_push_job() -> String {
    DEFAULT_JOB.to_string()
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            subsystem: default_subsystem(),
            metrics_path: default_metrics_path(),
            listen_address: None,
            push_gateway_url: None,
            push_metrics_url: None,
            push_interval_secs: default_push_interval_secs(),
            push_job: default_push_job(),
            basic_auth_user: None,
            basic_auth_password: None,
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("PROM").try_parsing(true)
}

impl ShimConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_source(environment())
    }

    pub fn from_source<T>(source: T) -> Result<Self>
    where
        T: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder().add_source(source).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Push settings, present only when both URLs are configured.
    pub fn push_gateway(&self) -> Option<PushGatewayConfig> {
        match (&self.push_gateway_url, &self.push_metrics_url) {
            (Some(url), Some(metrics_url)) if !url.is_empty() && !metrics_url.is_empty() => Some(
                PushGatewayConfig::new(
                    url.clone(),
                    metrics_url.clone(),
                    Duration::from_secs(self.push_interval_secs),
                )
                .with_job(self.push_job.clone()),
            ),
            _ => None,
        }
    }

    /// Scrape credentials, present only when both user and password are set.
    pub fn accounts(&self) -> Option<Accounts> {
        match (&self.basic_auth_user, &self.basic_auth_password) {
            (Some(user), Some(password)) => Some(Accounts::new().with(user.clone(), password.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ShimConfig {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ShimConfig::from_source(environment().source(Some(env))).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.subsystem, "gin");
        assert_eq!(config.metrics_path, "/metrics");
        assert!(config.listen_address.is_none());
        assert!(config.push_gateway().is_none());
        assert!(config.accounts().is_none());
    }

    #[test]
    fn test_push_and_auth_settings() {
        let config = load(&[
            ("PROM_PORT", "9000"),
            ("PROM_PUSH_GATEWAY_URL", "http://gw:9091"),
            ("PROM_PUSH_METRICS_URL", "http://localhost:9000/metrics"),
            ("PROM_PUSH_INTERVAL_SECS", "30"),
            ("PROM_PUSH_JOB", "api"),
            ("PROM_BASIC_AUTH_USER", "gin"),
            ("PROM_BASIC_AUTH_PASSWORD", "gonic"),
        ]);

        assert_eq!(config.port, 9000);
        let push = config.push_gateway().unwrap();
        assert_eq!(push.push_interval, Duration::from_secs(30));
        assert_eq!(push.job(), "api");
        assert_eq!(push.push_url("host"), "http://gw:9091/metrics/job/api/instance/host");
        assert!(config.accounts().is_some());
    }

    #[test]
    fn test_push_requires_both_urls() {
        let config = load(&[("PROM_PUSH_GATEWAY_URL", "http://gw:9091")]);
        assert!(config.push_gateway().is_none());
    }
}
