//! Metrics Registry
//!
//! Owns a Prometheus recorder (not installed globally), turns metric
//! definitions into typed collectors, and keeps the uptime counter ticking:
//! - `uptime`: seconds since the registry was created
//! - `requests_total`: requests by code, method, host and url
//! - `request_duration_seconds`, `request_size_bytes`, `response_size_bytes`
//!
//! Registration never fails the caller. Bad or duplicate definitions are
//! logged and skipped, leaving a partially populated handle set.

mod collector;
mod definition;
mod source;

pub use collector::{CollectorHandle, CounterVec, GaugeVec, HistogramVec, Summary, SummaryVec};
pub use definition::{
    full_name, ids, labels, names, standard_metrics, MetricDefinition, MetricKind,
    DEFAULT_BUCKETS,
};
pub use source::{Gatherers, MetricsSource};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use metrics::{KeyName, Recorder, SharedString};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MetricsError;

const UPTIME_TICK: Duration = Duration::from_secs(1);

/// Statically typed handles the request interceptor updates.
///
/// Any field may be `None` when its definition failed to register.
#[derive(Clone, Default)]
pub struct StandardCollectors {
    pub uptime: Option<CounterVec>,
    pub requests_total: Option<CounterVec>,
    pub request_duration: Option<Summary>,
    pub response_size: Option<Summary>,
    pub request_size: Option<Summary>,
}

impl StandardCollectors {
    fn from_handles(handles: &HashMap<String, CollectorHandle>) -> Self {
        let counter_vec = |id: &str| {
            handles
                .get(id)
                .and_then(CollectorHandle::as_counter_vec)
                .cloned()
        };
        let summary = |id: &str| handles.get(id).and_then(CollectorHandle::as_summary).cloned();

        Self {
            uptime: counter_vec(ids::UPTIME),
            requests_total: counter_vec(ids::REQUEST_COUNT),
            request_duration: summary(ids::REQUEST_DURATION),
            response_size: summary(ids::RESPONSE_SIZE),
            request_size: summary(ids::REQUEST_SIZE),
        }
    }
}

pub struct Registry {
    subsystem: String,
    handle: PrometheusHandle,
    handles: HashMap<String, CollectorHandle>,
    standard: StandardCollectors,
    errors: Vec<MetricsError>,
    shutdown: CancellationToken,
    uptime_task: Mutex<Option<JoinHandle<()>>>,
}

impl Registry {
    /// Register the standard request catalog under `subsystem`.
    ///
    /// Must be called from within a Tokio runtime for the uptime counter to
    /// advance; construction itself never blocks.
    pub fn new(subsystem: &str) -> Self {
        Self::with_metrics(subsystem, standard_metrics())
    }

    pub fn with_metrics(subsystem: &str, definitions: Vec<MetricDefinition>) -> Self {
        let mut errors = Vec::new();
        let mut seen_names = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut accepted = Vec::with_capacity(definitions.len());

        for definition in definitions {
            if let Err(e) = definition.validate() {
                warn!("{} couldn't be registered in Prometheus: {}", definition.name, e);
                errors.push(e);
                continue;
            }
            let name = full_name(subsystem, &definition.name);
            if seen_names.contains(&name) || seen_ids.contains(&definition.id) {
                let e = MetricsError::DuplicateRegistration { name };
                warn!("{}", e);
                errors.push(e);
                continue;
            }
            seen_names.insert(name.clone());
            seen_ids.insert(definition.id.clone());
            accepted.push((name, definition));
        }

        let recorder = Arc::new(build_recorder(&accepted));
        let handle = recorder.handle();

        let mut handles = HashMap::with_capacity(accepted.len());
        for (name, definition) in &accepted {
            describe(&*recorder, definition, name);
            handles.insert(
                definition.id.clone(),
                CollectorHandle::build(&recorder, definition, name),
            );
        }
        let standard = StandardCollectors::from_handles(&handles);

        info!(
            "Metrics registry '{}' initialized with {} collectors",
            subsystem,
            handles.len()
        );

        let registry = Self {
            subsystem: subsystem.to_string(),
            handle,
            handles,
            standard,
            errors,
            shutdown: CancellationToken::new(),
            uptime_task: Mutex::new(None),
        };
        let task = registry.spawn_uptime_ticker();
        *registry.uptime_task.lock() = task;
        registry
    }

    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// Handle registered for a definition id, if registration succeeded.
    pub fn handle(&self, id: &str) -> Option<&CollectorHandle> {
        self.handles.get(id)
    }

    pub fn handles(&self) -> &HashMap<String, CollectorHandle> {
        &self.handles
    }

    pub fn standard(&self) -> &StandardCollectors {
        &self.standard
    }

    /// Errors swallowed during registration.
    pub fn registration_errors(&self) -> &[MetricsError] {
        &self.errors
    }

    pub fn prometheus_handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    /// Render all series in the text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Stop the uptime ticker and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.uptime_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Uptime ticker ended abnormally: {}", e);
            }
        }
    }

    fn spawn_uptime_ticker(&self) -> Option<JoinHandle<()>> {
        let uptime = self.standard.uptime.as_ref()?;
        let counter = match uptime.with_label_values(&[]) {
            Ok(counter) => counter,
            Err(e) => {
                warn!("Uptime counter unavailable: {}", e);
                return None;
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No Tokio runtime available, the uptime counter will not advance");
                return None;
            }
        };

        let token = self.shutdown.clone();
        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(UPTIME_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => counter.increment(1),
                }
            }
            debug!("Uptime ticker stopped");
        }))
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl MetricsSource for Registry {
    fn render(&self) -> String {
        Registry::render(self)
    }
}

/// Recorder with per-metric buckets. If the exporter rejects a bucket list,
/// every histogram falls back to summary rendering rather than failing.
fn build_recorder(accepted: &[(String, MetricDefinition)]) -> PrometheusRecorder {
    let configured = accepted
        .iter()
        .try_fold(PrometheusBuilder::new(), |builder, (name, definition)| {
            match definition.effective_buckets() {
                Some(buckets) => builder.set_buckets_for_metric(Matcher::Full(name.clone()), buckets),
                None => Ok(builder),
            }
        });

    match configured {
        Ok(builder) => builder.build_recorder(),
        Err(e) => {
            warn!("Histogram buckets rejected, using exporter defaults: {}", e);
            PrometheusBuilder::new().build_recorder()
        }
    }
}

fn describe<R: Recorder>(recorder: &R, definition: &MetricDefinition, name: &str) {
    let key = KeyName::from(name.to_string());
    let help = SharedString::from(definition.help.clone());
    match definition.kind {
        MetricKind::Counter | MetricKind::CounterVec => recorder.describe_counter(key, None, help),
        MetricKind::Gauge | MetricKind::GaugeVec => recorder.describe_gauge(key, None, help),
        MetricKind::Histogram
        | MetricKind::HistogramVec
        | MetricKind::Summary
        | MetricKind::SummaryVec => recorder.describe_histogram(key, None, help),
    }
}
