//! Live collectors backing each registered definition.
//!
//! Scalar kinds wrap a `metrics` handle directly. Vector kinds keep the
//! recorder and their label names so a series can be resolved per call; the
//! label values are matched positionally against the declared names.

use std::sync::Arc;

use metrics::{Counter, Gauge, Histogram, Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::PrometheusRecorder;

use super::definition::{MetricDefinition, MetricKind};
use crate::error::MetricsError;

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Summary backed by an exporter histogram without buckets, which the
/// exporter renders as quantiles.
#[derive(Clone)]
pub struct Summary(Histogram);

impl From<Histogram> for Summary {
    fn from(histogram: Histogram) -> Self {
        Summary(histogram)
    }
}

impl Summary {
    pub fn observe(&self, value: f64) {
        self.0.record(value);
    }
}

#[derive(Clone)]
struct VecInner {
    recorder: Arc<PrometheusRecorder>,
    name: String,
    labels: Arc<[String]>,
}

impl VecInner {
    fn key(&self, values: &[&str]) -> Result<Key, MetricsError> {
        if values.len() != self.labels.len() {
            return Err(MetricsError::LabelCardinality {
                name: self.name.clone(),
                expected: self.labels.len(),
                got: values.len(),
            });
        }
        let labels: Vec<Label> = self
            .labels
            .iter()
            .zip(values)
            .map(|(k, v)| Label::new(k.clone(), v.to_string()))
            .collect();
        Ok(Key::from_parts(self.name.clone(), labels))
    }
}

macro_rules! vector_collector {
    ($(#[$doc:meta])* $name:ident, $item:ty, $register:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name(VecInner);

        impl $name {
            pub fn with_label_values(&self, values: &[&str]) -> Result<$item, MetricsError> {
                let key = self.0.key(values)?;
                Ok(self.0.recorder.$register(&key, &METADATA).into())
            }

            pub fn label_names(&self) -> &[String] {
                &self.0.labels
            }
        }
    };
}

vector_collector!(
    /// Counter partitioned by label values.
    CounterVec, Counter, register_counter
);
vector_collector!(GaugeVec, Gauge, register_gauge);
vector_collector!(HistogramVec, Histogram, register_histogram);
vector_collector!(SummaryVec, Summary, register_histogram);

/// Typed handle for one registered definition.
#[derive(Clone)]
pub enum CollectorHandle {
    Counter(Counter),
    CounterVec(CounterVec),
    Gauge(Gauge),
    GaugeVec(GaugeVec),
    Histogram(Histogram),
    HistogramVec(HistogramVec),
    Summary(Summary),
    SummaryVec(SummaryVec),
}

impl CollectorHandle {
    /// Build the collector for `definition` under its full exposed `name`.
    pub(crate) fn build(
        recorder: &Arc<PrometheusRecorder>,
        definition: &MetricDefinition,
        name: &str,
    ) -> Self {
        let scalar = Key::from_name(name.to_string());
        let vec = || VecInner {
            recorder: recorder.clone(),
            name: name.to_string(),
            labels: definition.labels.clone().into(),
        };

        match definition.kind {
            MetricKind::Counter => {
                CollectorHandle::Counter(recorder.register_counter(&scalar, &METADATA))
            }
            MetricKind::CounterVec => CollectorHandle::CounterVec(CounterVec(vec())),
            MetricKind::Gauge => CollectorHandle::Gauge(recorder.register_gauge(&scalar, &METADATA)),
            MetricKind::GaugeVec => CollectorHandle::GaugeVec(GaugeVec(vec())),
            MetricKind::Histogram => {
                CollectorHandle::Histogram(recorder.register_histogram(&scalar, &METADATA))
            }
            MetricKind::HistogramVec => CollectorHandle::HistogramVec(HistogramVec(vec())),
            MetricKind::Summary => {
                CollectorHandle::Summary(Summary(recorder.register_histogram(&scalar, &METADATA)))
            }
            MetricKind::SummaryVec => CollectorHandle::SummaryVec(SummaryVec(vec())),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            CollectorHandle::Counter(_) => MetricKind::Counter,
            CollectorHandle::CounterVec(_) => MetricKind::CounterVec,
            CollectorHandle::Gauge(_) => MetricKind::Gauge,
            CollectorHandle::GaugeVec(_) => MetricKind::GaugeVec,
            CollectorHandle::Histogram(_) => MetricKind::Histogram,
            CollectorHandle::HistogramVec(_) => MetricKind::HistogramVec,
            CollectorHandle::Summary(_) => MetricKind::Summary,
            CollectorHandle::SummaryVec(_) => MetricKind::SummaryVec,
        }
    }

    pub fn as_counter_vec(&self) -> Option<&CounterVec> {
        match self {
            CollectorHandle::CounterVec(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_summary(&self) -> Option<&Summary> {
        match self {
            CollectorHandle::Summary(s) => Some(s),
            _ => None,
        }
    }
}
