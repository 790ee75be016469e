use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::metrics::MetricsSource;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Serve the current state of `source` as Prometheus text.
pub async fn metrics_handler(State(source): State<Arc<dyn MetricsSource>>) -> Response {
    render(source.as_ref())
}

pub(crate) fn render(source: &dyn MetricsSource) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        source.render(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Registry;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_serves_exposition_text() {
        let registry = Arc::new(Registry::new("gin"));
        let source: Arc<dyn MetricsSource> = registry.clone();
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(source);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("# TYPE gin_uptime counter"));
        assert!(text.contains("# HELP gin_uptime HTTP service uptime."));
        registry.shutdown().await;
    }
}
