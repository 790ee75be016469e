use std::net::SocketAddr;

use axum::{
    extract::Path,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use axum_prometheus_shim::config::ShimConfig;
use axum_prometheus_shim::Prometheus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axum_prometheus_shim=debug,prom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ShimConfig::load()?;

    tracing::info!("Starting prom-demo v{}", env!("CARGO_PKG_VERSION"));

    let mut prom = Prometheus::new(&config.subsystem);
    if let Some(address) = &config.listen_address {
        prom.set_listen_address(address);
        tracing::info!("Metrics exposed on separate listener {}", address);
    }
    if let Some(push) = config.push_gateway() {
        prom.set_push_gateway_job(push.job());
        prom.set_push_gateway(&push.url, &push.metrics_url, push.push_interval);
        tracing::info!("Pushing metrics to {} as job {}", push.url, push.job());
    }

    let app = Router::new()
        .route("/", get(index))
        .route("/version", get(version))
        .route("/data", post(data))
        .route("/users/:id", get(user));

    let app = match config.accounts() {
        Some(accounts) => prom.use_router_with_auth(app, accounts, &config.metrics_path),
        None => prom.use_router(app, &config.metrics_path),
    }
    .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Shutting down metrics tasks");
    prom.shutdown().await;

    Ok(())
}

async fn index() -> Json<Value> {
    Json(json!({ "package": env!("CARGO_PKG_NAME") }))
}

async fn version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION"), "time": chrono::Utc::now() }))
}

async fn data() -> Json<Value> {
    Json(json!({ "success": true }))
}

async fn user(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "id": id }))
}
