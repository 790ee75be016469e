use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;

use crate::api::handlers;
use crate::api::middleware::{require_basic_auth, Accounts};
use crate::metrics::MetricsSource;

/// Router serving `source` at `path`, optionally behind Basic auth.
///
/// The returned router works with any application state, so it can be merged
/// into the application router or served on its own listener.
pub fn create_metrics_router<S>(
    path: &str,
    source: Arc<dyn MetricsSource>,
    accounts: Option<Arc<Accounts>>,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let scrape = get(handlers::metrics_handler).with_state(source);
    let scrape = match accounts {
        Some(accounts) => {
            scrape.layer(axum_middleware::from_fn_with_state(accounts, require_basic_auth))
        }
        None => scrape,
    };

    Router::new().route(path, scrape)
}
