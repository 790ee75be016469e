//! Push Gateway Reporter
//!
//! Periodically fetches the locally exposed metrics text and forwards it to a
//! Prometheus push gateway at `<url>/metrics/job/<job>/instance/<hostname>`.
//!
//! Failures are logged through the injected [`Logger`] and the next tick
//! simply tries again. There is no backoff.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MetricsError, Result};
use crate::logger::Logger;

pub const DEFAULT_JOB: &str = "gin";

#[derive(Debug, Clone)]
pub struct PushGatewayConfig {
    pub push_interval: Duration,
    /// Gateway base URL, e.g. `http://pushgateway:9091`
    pub url: String,
    /// Local scrape URL the pushed text is fetched from
    pub metrics_url: String,
    /// Job name; empty means [`DEFAULT_JOB`]
    pub job: String,
    /// Bound on each outbound call. `None` keeps the HTTP client default.
    pub request_timeout: Option<Duration>,
}

impl PushGatewayConfig {
    pub fn new(url: impl Into<String>, metrics_url: impl Into<String>, push_interval: Duration) -> Self {
        Self {
            push_interval,
            url: url.into(),
            metrics_url: metrics_url.into(),
            job: String::new(),
            request_timeout: None,
        }
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn job(&self) -> &str {
        if self.job.is_empty() {
            DEFAULT_JOB
        } else {
            &self.job
        }
    }

    pub fn push_url(&self, hostname: &str) -> String {
        format!(
            "{}/metrics/job/{}/instance/{}",
            self.url.trim_end_matches('/'),
            self.job(),
            hostname
        )
    }
}

/// Current host name, or an empty string when it cannot be resolved.
pub fn resolve_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}

struct Pusher {
    config: RwLock<PushGatewayConfig>,
    client: reqwest::Client,
    logger: Arc<dyn Logger>,
}

impl Pusher {
    async fn push_once(&self) -> Result<()> {
        let (metrics_url, push_url, timeout) = {
            let config = self.config.read();
            (
                config.metrics_url.clone(),
                config.push_url(&resolve_hostname()),
                config.request_timeout,
            )
        };

        let body = self.fetch(&metrics_url, timeout).await?;
        self.send(&push_url, body, timeout).await
    }

    async fn fetch(&self, url: &str, timeout: Option<Duration>) -> Result<Bytes> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        check_status(url, response.status())?;
        Ok(response.bytes().await?)
    }

    async fn send(&self, url: &str, body: Bytes, timeout: Option<Duration>) -> Result<()> {
        let mut request = self.client.post(url).body(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        check_status(url, response.status())?;
        debug!("Pushed metrics to {}", url);
        Ok(())
    }
}

fn check_status(url: &str, status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(MetricsError::UnexpectedStatus {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

/// Background reporter. Idle until [`start`](Self::start), then pushes every
/// `push_interval` until [`stop`](Self::stop) or drop.
pub struct PushReporter {
    pusher: Arc<Pusher>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PushReporter {
    pub fn new(config: PushGatewayConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            pusher: Arc::new(Pusher {
                config: RwLock::new(config),
                client: reqwest::Client::new(),
                logger,
            }),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the push loop on the current Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let period = self.pusher.config.read().push_interval;
        if period.is_zero() {
            self.pusher
                .logger
                .error("Push interval must be greater than zero, push gateway reporter not started");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.pusher
                    .logger
                    .error("No Tokio runtime available, push gateway reporter not started");
                return;
            }
        };

        info!(
            "Starting push gateway reporter (interval: {:?}, gateway: {})",
            period,
            self.pusher.config.read().url
        );
        *task = Some(runtime.spawn(run(
            self.pusher.clone(),
            self.shutdown.clone(),
            period,
        )));
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Change the job name used by subsequent pushes.
    pub fn set_job(&self, job: impl Into<String>) {
        self.pusher.config.write().job = job.into();
    }

    pub fn config(&self) -> PushGatewayConfig {
        self.pusher.config.read().clone()
    }

    /// One fetch-and-push cycle, outside the timer loop.
    pub async fn push_once(&self) -> Result<()> {
        self.pusher.push_once().await
    }

    /// Cancel the loop, including an in-flight push, and wait for it to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                self.pusher
                    .logger
                    .error(&format!("Push gateway reporter ended abnormally: {}", e));
            }
        }
    }
}

impl Drop for PushReporter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(pusher: Arc<Pusher>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = pusher.push_once() => {
                if let Err(e) = result {
                    pusher.logger.error(&format!("Error sending to push gateway: {}", e));
                }
            }
        }
    }
    debug!("Push gateway reporter stopped");
}
