//! Metric definitions and the standard request catalog.

use std::fmt;
use std::str::FromStr;

use crate::error::MetricsError;

/// Default histogram buckets, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Definition identifiers of the standard catalog
pub mod ids {
    pub const UPTIME: &str = "uptime";
    pub const REQUEST_COUNT: &str = "reqCnt";
    pub const REQUEST_DURATION: &str = "reqDur";
    pub const RESPONSE_SIZE: &str = "resSz";
    pub const REQUEST_SIZE: &str = "reqSz";
}

/// Exposed metric names (before the subsystem prefix)
pub mod names {
    pub const UPTIME: &str = "uptime";
    pub const REQUESTS_TOTAL: &str = "requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";
    pub const RESPONSE_SIZE_BYTES: &str = "response_size_bytes";
    pub const REQUEST_SIZE_BYTES: &str = "request_size_bytes";
}

/// Label keys
pub mod labels {
    pub const CODE: &str = "code";
    pub const METHOD: &str = "method";
    pub const HOST: &str = "host";
    pub const URL: &str = "url";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    CounterVec,
    Gauge,
    GaugeVec,
    Histogram,
    HistogramVec,
    Summary,
    SummaryVec,
}

impl MetricKind {
    pub fn is_vector(self) -> bool {
        matches!(
            self,
            MetricKind::CounterVec
                | MetricKind::GaugeVec
                | MetricKind::HistogramVec
                | MetricKind::SummaryVec
        )
    }

    /// Whether the exporter needs explicit buckets for this kind.
    pub fn is_bucketed(self) -> bool {
        matches!(self, MetricKind::Histogram | MetricKind::HistogramVec)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::CounterVec => "counter_vec",
            MetricKind::Gauge => "gauge",
            MetricKind::GaugeVec => "gauge_vec",
            MetricKind::Histogram => "histogram",
            MetricKind::HistogramVec => "histogram_vec",
            MetricKind::Summary => "summary",
            MetricKind::SummaryVec => "summary_vec",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "counter_vec" => Ok(MetricKind::CounterVec),
            "gauge" => Ok(MetricKind::Gauge),
            "gauge_vec" => Ok(MetricKind::GaugeVec),
            "histogram" => Ok(MetricKind::Histogram),
            "histogram_vec" => Ok(MetricKind::HistogramVec),
            "summary" => Ok(MetricKind::Summary),
            "summary_vec" => Ok(MetricKind::SummaryVec),
            other => Err(MetricsError::UnknownKind(other.to_string())),
        }
    }
}

/// Name, help text, kind and label names of one metric.
///
/// Immutable once handed to the [`Registry`](super::Registry).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    pub id: String,
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub labels: Vec<String>,
    pub buckets: Option<Vec<f64>>,
}

impl MetricDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        help: impl Into<String>,
        kind: MetricKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            help: help.into(),
            kind,
            labels: Vec::new(),
            buckets: None,
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Override the buckets of a histogram kind. Ignored for other kinds.
    pub fn with_buckets(mut self, buckets: &[f64]) -> Self {
        self.buckets = Some(buckets.to_vec());
        self
    }

    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.name.trim().is_empty() {
            return Err(MetricsError::InvalidName {
                id: self.id.clone(),
            });
        }
        if !self.kind.is_vector() && !self.labels.is_empty() {
            return Err(MetricsError::UnexpectedLabels {
                name: self.name.clone(),
                kind: self.kind,
                labels: self.labels.clone(),
            });
        }
        Ok(())
    }

    /// Buckets the exporter should use, `None` for non-histogram kinds.
    pub fn effective_buckets(&self) -> Option<&[f64]> {
        if !self.kind.is_bucketed() {
            return None;
        }
        match &self.buckets {
            Some(b) if !b.is_empty() => Some(b.as_slice()),
            _ => Some(DEFAULT_BUCKETS),
        }
    }
}

/// Join subsystem and name the way the Prometheus clients do.
pub fn full_name(subsystem: &str, name: &str) -> String {
    if subsystem.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", subsystem, name)
    }
}

/// The built-in request catalog: uptime, request count, duration and sizes.
pub fn standard_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new(
            ids::UPTIME,
            names::UPTIME,
            "HTTP service uptime.",
            MetricKind::CounterVec,
        ),
        MetricDefinition::new(
            ids::REQUEST_COUNT,
            names::REQUESTS_TOTAL,
            "How many HTTP requests processed, partitioned by status code and HTTP method.",
            MetricKind::CounterVec,
        )
        .with_labels([labels::CODE, labels::METHOD, labels::HOST, labels::URL]),
        MetricDefinition::new(
            ids::REQUEST_DURATION,
            names::REQUEST_DURATION_SECONDS,
            "The HTTP request latencies in seconds.",
            MetricKind::Summary,
        ),
        MetricDefinition::new(
            ids::RESPONSE_SIZE,
            names::RESPONSE_SIZE_BYTES,
            "The HTTP response sizes in bytes.",
            MetricKind::Summary,
        ),
        MetricDefinition::new(
            ids::REQUEST_SIZE,
            names::REQUEST_SIZE_BYTES,
            "The HTTP request sizes in bytes.",
            MetricKind::Summary,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("summary_vec".parse::<MetricKind>().unwrap(), MetricKind::SummaryVec);
        assert_eq!("counter".parse::<MetricKind>().unwrap(), MetricKind::Counter);
        assert!(matches!(
            "timer".parse::<MetricKind>(),
            Err(MetricsError::UnknownKind(k)) if k == "timer"
        ));
    }

    #[test]
    fn test_scalar_kind_rejects_labels() {
        let def = MetricDefinition::new("x", "x", "help", MetricKind::Gauge).with_labels(["a"]);
        assert!(matches!(def.validate(), Err(MetricsError::UnexpectedLabels { .. })));
    }

    #[test]
    fn test_empty_name_rejected() {
        let def = MetricDefinition::new("x", " ", "help", MetricKind::Counter);
        assert!(matches!(def.validate(), Err(MetricsError::InvalidName { .. })));
    }

    #[test]
    fn test_standard_catalog() {
        let catalog = standard_metrics();
        let names: Vec<_> = catalog.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "uptime",
                "requests_total",
                "request_duration_seconds",
                "response_size_bytes",
                "request_size_bytes"
            ]
        );
        assert!(catalog.iter().all(|d| d.validate().is_ok()));
        assert_eq!(catalog[1].labels, vec!["code", "method", "host", "url"]);
        assert!(catalog[0].labels.is_empty());
    }

    #[test]
    fn test_full_name() {
        assert_eq!(full_name("gin", "uptime"), "gin_uptime");
        assert_eq!(full_name("", "uptime"), "uptime");
    }

    #[test]
    fn test_buckets_only_for_histograms() {
        let summary = MetricDefinition::new("s", "s", "h", MetricKind::Summary).with_buckets(&[1.0]);
        assert_eq!(summary.effective_buckets(), None);

        let hist = MetricDefinition::new("h", "h", "h", MetricKind::Histogram);
        assert_eq!(hist.effective_buckets(), Some(DEFAULT_BUCKETS));

        let custom = MetricDefinition::new("h", "h", "h", MetricKind::HistogramVec)
            .with_labels(["a"])
            .with_buckets(&[0.1, 1.0]);
        assert_eq!(custom.effective_buckets(), Some(&[0.1, 1.0][..]));
    }
}
