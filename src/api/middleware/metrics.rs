//! HTTP Metrics Middleware
//!
//! Records for every request except the scrape endpoint itself:
//! - Request count by status code, method, host and normalized url
//! - Request duration summary
//! - Approximate request size and response size summaries

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{FromRequestParts, MatchedPath, RawPathParams, State},
    http::{header, HeaderMap, Request, Uri},
    middleware::Next,
    response::Response,
};
use http_body::{Body as HttpBody, Frame, SizeHint};
use tracing::debug;

use crate::metrics::{StandardCollectors, Summary};

/// Maps a request to the value of the `url` label.
pub type UrlFormatter = Arc<dyn Fn(&RequestLabels) -> String + Send + Sync>;

/// What a [`UrlFormatter`] gets to look at.
#[derive(Debug, Clone, Default)]
pub struct RequestLabels {
    /// Percent-encoded request path, without the query.
    pub path: String,
    /// Route parameters in match order, as (name, value).
    pub params: Vec<(String, String)>,
    /// Route template, when the router matched one.
    pub matched_path: Option<String>,
}

/// Replace each route parameter value in the path with `:<name>`.
///
/// `/users/42` matched by `/users/:id` becomes `/users/:id`, which keeps the
/// `url` label from growing one series per id.
pub fn default_url_formatter(labels: &RequestLabels) -> String {
    let mut url = labels.path.clone();
    for (name, value) in &labels.params {
        if value.is_empty() {
            continue;
        }
        url = url.replacen(value.as_str(), &format!(":{}", name), 1);
    }
    url
}

/// Interceptor state shared by every request.
pub struct RequestMetrics {
    collectors: StandardCollectors,
    metrics_path: String,
    url_formatter: UrlFormatter,
}

impl RequestMetrics {
    pub fn new(collectors: StandardCollectors, metrics_path: impl Into<String>) -> Self {
        Self {
            collectors,
            metrics_path: metrics_path.into(),
            url_formatter: Arc::new(default_url_formatter),
        }
    }

    pub fn with_url_formatter(mut self, formatter: UrlFormatter) -> Self {
        self.url_formatter = formatter;
        self
    }

    pub fn metrics_path(&self) -> &str {
        &self.metrics_path
    }

    fn is_scrape(&self, uri: &Uri) -> bool {
        uri.path_and_query()
            .map(|pq| pq.as_str() == self.metrics_path)
            .unwrap_or(false)
    }
}

/// Middleware to record HTTP metrics for each request
pub async fn track_requests(
    State(metrics): State<Arc<RequestMetrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if metrics.is_scrape(request.uri()) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let request_size = approximate_request_size(&request);
    let method = request.method().to_string();
    let host = request_host(&request).to_string();

    let (mut parts, body) = request.into_parts();
    let params = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };
    let labels = RequestLabels {
        path: parts.uri.path().to_string(),
        params,
        matched_path: parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string()),
    };
    let url = (metrics.url_formatter)(&labels);

    let response = next.run(Request::from_parts(parts, body)).await;

    let status = response.status().as_u16().to_string();
    let elapsed = start.elapsed().as_secs_f64();
    let collectors = &metrics.collectors;

    if let Some(duration) = &collectors.request_duration {
        duration.observe(elapsed);
    }
    if let Some(requests) = &collectors.requests_total {
        match requests.with_label_values(&[&status, &method, &host, &url]) {
            Ok(counter) => counter.increment(1),
            Err(e) => debug!("Skipping request count: {}", e),
        }
    }
    if let Some(size) = &collectors.request_size {
        size.observe(request_size as f64);
    }

    match &collectors.response_size {
        Some(size) => observe_response_size(response, size.clone()),
        None => response,
    }
}

fn observe_response_size(response: Response, summary: Summary) -> Response {
    if let Some(exact) = response.body().size_hint().exact() {
        summary.observe(exact as f64);
        return response;
    }
    response.map(|body| Body::new(CountingBody::new(body, summary)))
}

/// Approximate wire size of a request: request line, headers, host and the
/// declared content length. Bodies of unknown length count as zero.
pub fn approximate_request_size<B>(request: &Request<B>) -> usize {
    let headers = request.headers();

    let mut size = request.uri().to_string().len();
    size += request.method().as_str().len();
    size += format!("{:?}", request.version()).len();

    for name in headers.keys() {
        if name == header::HOST {
            continue;
        }
        size += name.as_str().len();
        size += headers.get_all(name).iter().map(|v| v.len()).sum::<usize>();
    }

    size += request_host(request).len();
    if let Some(length) = content_length(headers) {
        size += length;
    }
    size
}

fn request_host<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .unwrap_or("")
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Response body wrapper counting streamed bytes. The total is observed once,
/// when the stream ends or the body is dropped.
struct CountingBody {
    inner: Body,
    bytes: u64,
    summary: Option<Summary>,
}

impl CountingBody {
    fn new(inner: Body, summary: Summary) -> Self {
        Self {
            inner,
            bytes: 0,
            summary: Some(summary),
        }
    }

    fn finish(&mut self) {
        if let Some(summary) = self.summary.take() {
            summary.observe(self.bytes as f64);
        }
    }
}

impl HttpBody for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        match &poll {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes += data.len() as u64;
                }
            }
            Poll::Ready(None) => this.finish(),
            _ => {}
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CountingBody {
    fn drop(&mut self) {
        self.finish();
    }
}
