use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

/// Anything that can produce Prometheus text exposition on demand.
pub trait MetricsSource: Send + Sync {
    fn render(&self) -> String;
}

impl MetricsSource for PrometheusHandle {
    fn render(&self) -> String {
        PrometheusHandle::render(self)
    }
}

impl<T: MetricsSource + ?Sized> MetricsSource for Arc<T> {
    fn render(&self) -> String {
        (**self).render()
    }
}

/// Ordered set of sources served together as one body.
#[derive(Clone, Default)]
pub struct Gatherers(Vec<Arc<dyn MetricsSource>>);

impl Gatherers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.0.push(source);
        self
    }

    pub fn push(&mut self, source: Arc<dyn MetricsSource>) {
        self.0.push(source);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Arc<dyn MetricsSource>> for Gatherers {
    fn from_iter<I: IntoIterator<Item = Arc<dyn MetricsSource>>>(iter: I) -> Self {
        Gatherers(iter.into_iter().collect())
    }
}

impl MetricsSource for Gatherers {
    fn render(&self) -> String {
        let mut out = String::new();
        for source in &self.0 {
            let body = source.render();
            out.push_str(&body);
            if !body.is_empty() && !body.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl MetricsSource for Fixed {
        fn render(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_gatherers_concatenate_in_order() {
        let gatherers = Gatherers::new()
            .with(Arc::new(Fixed("a_total 1")))
            .with(Arc::new(Fixed("")))
            .with(Arc::new(Fixed("b_total 2\n")));

        assert_eq!(gatherers.len(), 3);
        assert_eq!(gatherers.render(), "a_total 1\nb_total 2\n");
    }
}
