//! Prometheus instrumentation for an axum application.
//!
//! Ties the registry, the request middleware, the scrape endpoint and the
//! push reporter together behind the setters a host application configures
//! at startup.
//!
//! ```no_run
//! # use axum::{routing::get, Router};
//! # use axum_prometheus_shim::{Accounts, Prometheus};
//! # async fn demo() {
//! let prom = Prometheus::new("gin");
//! let app: Router = Router::new().route("/", get(|| async { "ok" }));
//! let app = prom.use_router_with_auth(app, Accounts::new().with("gin", "gonic"), "/metrics");
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Request, middleware as axum_middleware, response::Response, Router};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::middleware::{track_requests, Accounts, RequestMetrics, UrlFormatter};
use crate::api::routes::create_metrics_router;
use crate::error::MetricsError;
use crate::logger::{default_logger, Logger};
use crate::metrics::{Gatherers, MetricsSource, Registry};
use crate::services::{PushGatewayConfig, PushReporter};

/// Where the scrape endpoint lives when it is not on the application router.
///
/// Every mount merges into the same router; one server serves it.
struct SeparateListener {
    address: String,
    router: Arc<RwLock<Router>>,
    started: AtomicBool,
}

pub struct Prometheus {
    registry: Arc<Registry>,
    listener: Option<SeparateListener>,
    url_formatter: Option<UrlFormatter>,
    logger: Arc<dyn Logger>,
    push: Option<PushReporter>,
    push_job: Option<String>,
    shutdown: CancellationToken,
    servers: Mutex<Vec<JoinHandle<()>>>,
}

impl Prometheus {
    /// Register the standard metrics under `subsystem`.
    pub fn new(subsystem: &str) -> Self {
        Self::with_registry(Arc::new(Registry::new(subsystem)))
    }

    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            listener: None,
            url_formatter: None,
            logger: default_logger(),
            push: None,
            push_job: None,
            shutdown: CancellationToken::new(),
            servers: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = logger;
    }

    /// Serve metrics on `address` with a fresh router instead of the
    /// application router. An empty address keeps the embedded mode.
    pub fn set_listen_address(&mut self, address: &str) {
        self.set_listen_address_with_router(address, Router::new());
    }

    /// Serve metrics on `address` using `router`, which keeps scrapes out of
    /// the application's own access log.
    pub fn set_listen_address_with_router(&mut self, address: &str, router: Router) {
        self.listener = if address.is_empty() {
            None
        } else {
            Some(SeparateListener {
                address: address.to_string(),
                router: Arc::new(RwLock::new(router)),
                started: AtomicBool::new(false),
            })
        };
    }

    pub fn set_url_formatter(&mut self, formatter: UrlFormatter) {
        self.url_formatter = Some(formatter);
    }

    /// Start pushing `metrics_url` to `gateway_url` every `interval`.
    /// Replaces any reporter started before.
    pub fn set_push_gateway(&mut self, gateway_url: &str, metrics_url: &str, interval: Duration) {
        let mut config = PushGatewayConfig::new(gateway_url, metrics_url, interval);
        if let Some(job) = &self.push_job {
            config = config.with_job(job.clone());
        }

        let reporter = PushReporter::new(config, self.logger.clone());
        reporter.start();
        // Dropping the previous reporter cancels its loop.
        self.push = Some(reporter);
    }

    /// Job name for pushes, `gin` when never set.
    pub fn set_push_gateway_job(&mut self, job: &str) {
        self.push_job = Some(job.to_string());
        if let Some(reporter) = &self.push {
            reporter.set_job(job);
        }
    }

    pub fn push_reporter(&self) -> Option<&PushReporter> {
        self.push.as_ref()
    }

    /// Instrument every route of `app` and expose the registry at `path`.
    ///
    /// Call this after the application routes are defined; routes added to
    /// the returned router afterwards are not instrumented.
    pub fn use_router<S>(&self, app: Router<S>, path: &str) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let app = self.instrument(app, path);
        self.mount(app, path, self.registry.clone(), None)
    }

    /// Like [`use_router`](Self::use_router) with the scrape endpoint behind
    /// Basic authentication.
    pub fn use_router_with_auth<S>(&self, app: Router<S>, accounts: Accounts, path: &str) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let app = self.instrument(app, path);
        self.mount(app, path, self.registry.clone(), Some(Arc::new(accounts)))
    }

    /// Expose `gatherers` at `path` without instrumenting `app`.
    pub fn use_with_custom_metrics<S>(&self, app: Router<S>, gatherers: Gatherers, path: &str) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.mount(app, path, Arc::new(gatherers), None)
    }

    /// Stop the standalone metrics server, the push reporter and the uptime
    /// ticker, waiting for each to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(reporter) = &self.push {
            reporter.stop().await;
        }

        let servers: Vec<_> = self.servers.lock().drain(..).collect();
        for server in servers {
            if let Err(e) = server.await {
                self.logger
                    .error(&format!("Metrics server ended abnormally: {}", e));
            }
        }
        self.registry.shutdown().await;
    }

    fn instrument<S>(&self, app: Router<S>, path: &str) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let mut metrics = RequestMetrics::new(self.registry.standard().clone(), path);
        if let Some(formatter) = &self.url_formatter {
            metrics = metrics.with_url_formatter(formatter.clone());
        }
        app.layer(axum_middleware::from_fn_with_state(
            Arc::new(metrics),
            track_requests,
        ))
    }

    fn mount<S>(
        &self,
        app: Router<S>,
        path: &str,
        source: Arc<dyn MetricsSource>,
        accounts: Option<Arc<Accounts>>,
    ) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        match &self.listener {
            Some(listener) => {
                {
                    let mut router = listener.router.write();
                    let current = std::mem::take(&mut *router);
                    *router = current.merge(create_metrics_router::<()>(path, source, accounts));
                }
                if !listener.started.swap(true, Ordering::SeqCst) {
                    self.spawn_server(listener.address.clone(), listener.router.clone());
                }
                app
            }
            None => app.merge(create_metrics_router::<S>(path, source, accounts)),
        }
    }

    fn spawn_server(&self, address: String, shared: Arc<RwLock<Router>>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.logger
                    .error("No Tokio runtime available, metrics server not started");
                return;
            }
        };

        // Each request sees the routes mounted so far.
        let router = Router::new().fallback(move |request: Request| {
            let current = shared.read().clone();
            async move { serve_current(current, request).await }
        });

        let logger = self.logger.clone();
        let shutdown = self.shutdown.clone();
        let server = runtime.spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&address).await {
                Ok(listener) => listener,
                Err(source) => {
                    let e = MetricsError::InvalidListenAddress { address, source };
                    logger.error(&e.to_string());
                    return;
                }
            };
            info!("Metrics server listening on {}", address);

            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                logger.error(&format!("Metrics server error: {}", e));
            }
        });
        self.servers.lock().push(server);
    }
}

impl Drop for Prometheus {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve_current(router: Router, request: Request) -> Response {
    match router.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::testing::RecordingLogger;
    use crate::metrics::tests::sample;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "home" }))
            .route("/users/:id", get(|| async { "user" }))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("host", "localhost")
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn free_address() -> String {
        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_embedded_scrape_endpoint() {
        let prom = Prometheus::new("gin");
        let app = prom.use_router(app(), "/metrics");

        let response = app.clone().oneshot(get_request("/users/5")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert_eq!(
            sample(
                &text,
                r#"gin_requests_total{code="200",method="GET",host="localhost",url="/users/:id"}"#
            ),
            Some(1.0)
        );
        assert!(!text.contains(r#"url="/metrics""#));
        prom.shutdown().await;
    }

    #[tokio::test]
    async fn test_scrape_with_auth() {
        let prom = Prometheus::new("gin");
        let app = prom.use_router_with_auth(app(), Accounts::new().with("gin", "gonic"), "/metrics");

        let response = app.clone().oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(response).await.is_empty());

        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        prom.shutdown().await;
    }

    #[tokio::test]
    async fn test_custom_url_formatter_is_used() {
        let mut prom = Prometheus::new("gin");
        prom.set_url_formatter(Arc::new(|_: &crate::api::middleware::RequestLabels| {
            "all".to_string()
        }));
        let app = prom.use_router(app(), "/metrics");

        app.oneshot(get_request("/users/77")).await.unwrap();

        assert!(prom.registry().render().contains(r#"url="all""#));
        prom.shutdown().await;
    }

    #[tokio::test]
    async fn test_custom_metrics_embedded() {
        let prom = Prometheus::new("gin");
        let gatherers = Gatherers::new().with(Arc::new(Static));
        let app = prom.use_with_custom_metrics(app(), gatherers, "/custom");

        let response = app.oneshot(get_request("/custom")).await.unwrap();
        assert_eq!(body_text(response).await, "custom_total 7\n");
        prom.shutdown().await;
    }

    #[tokio::test]
    async fn test_separate_listener() {
        let address = free_address();
        let mut prom = Prometheus::new("gin");
        prom.set_listen_address(&address);
        let app = prom.use_router(app(), "/metrics");

        // The application router no longer serves the scrape path.
        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let url = format!("http://{}/metrics", address);
        let mut body = None;
        for _ in 0..50 {
            if let Ok(response) = reqwest::get(&url).await {
                body = Some(response.text().await.unwrap());
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(body.unwrap().contains("gin_uptime"));

        prom.shutdown().await;
        assert!(reqwest::get(&url).await.is_err());
    }

    async fn scrape(url: &str) -> Option<(StatusCode, String)> {
        for _ in 0..50 {
            if let Ok(response) = reqwest::get(url).await {
                let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
                return Some((status, response.text().await.unwrap()));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    struct Static;

    impl MetricsSource for Static {
        fn render(&self) -> String {
            "custom_total 7\n".to_string()
        }
    }

    #[tokio::test]
    async fn test_separate_listener_serves_every_mount() {
        let address = free_address();
        let logger = Arc::new(RecordingLogger::default());
        let mut prom = Prometheus::new("gin");
        prom.set_logger(logger.clone());
        prom.set_listen_address(&address);

        let _app = prom.use_router(app(), "/metrics");
        let _app = prom.use_with_custom_metrics(app(), Gatherers::new().with(Arc::new(Static)), "/custom");

        let (status, body) = scrape(&format!("http://{}/metrics", address)).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("gin_uptime"));

        let (status, body) = scrape(&format!("http://{}/custom", address)).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "custom_total 7\n");

        prom.shutdown().await;
        assert!(logger.messages().is_empty(), "{:?}", logger.messages());
    }

    #[tokio::test]
    async fn test_dropping_facade_stops_metrics_server() {
        let address = free_address();
        let url = format!("http://{}/metrics", address);
        let mut prom = Prometheus::new("gin");
        prom.set_listen_address(&address);
        let _app = prom.use_router(app(), "/metrics");

        let (status, _) = scrape(&url).await.unwrap();
        assert_eq!(status, StatusCode::OK);

        drop(prom);

        let mut stopped = false;
        for _ in 0..50 {
            if reqwest::get(&url).await.is_err() {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stopped, "metrics server still listening after drop");
    }

    #[tokio::test]
    async fn test_bind_failure_is_logged() {
        let logger = Arc::new(RecordingLogger::default());
        let mut prom = Prometheus::new("gin");
        prom.set_logger(logger.clone());
        prom.set_listen_address("not-an-address");
        let _app = prom.use_router(app(), "/metrics");

        prom.shutdown().await;
        assert_eq!(logger.count(), 1);
        assert!(logger.messages()[0].contains("not-an-address"));
    }

    #[tokio::test]
    async fn test_push_job_applies_to_later_gateway() {
        let mut prom = Prometheus::new("gin");
        prom.set_push_gateway_job("batch");
        prom.set_push_gateway("http://127.0.0.1:1", "http://127.0.0.1:1/metrics", Duration::from_secs(60));

        let reporter = prom.push_reporter().unwrap();
        assert!(reporter.is_running());
        assert_eq!(reporter.config().job(), "batch");

        prom.set_push_gateway_job("nightly");
        assert_eq!(prom.push_reporter().unwrap().config().job(), "nightly");

        prom.shutdown().await;
        assert!(!prom.push_reporter().unwrap().is_running());
    }
}
