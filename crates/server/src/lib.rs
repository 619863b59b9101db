// crates/server/src/lib.rs
//! manimate server library.
//!
//! Axum HTTP surface over the job pipeline: prompt admission, status and
//! content SSE subscriptions, job snapshots, renderer reports, health and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::{ServerArgs, WatchMode};
pub use error::*;
pub use crate::metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::http::header::InvalidHeaderValue;
use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use manimate_observability::http_trace_layer;

/// CORS for browser clients: one configured origin, or any when unset.
pub fn cors_layer(origin: Option<&str>) -> Result<CorsLayer, InvalidHeaderValue> {
    let allow_origin = match origin {
        Some(origin) => AllowOrigin::exact(HeaderValue::from_str(origin)?),
        None => AllowOrigin::from(Any),
    };
    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

/// Create the Axum application with all routes and middleware.
pub fn create_app(state: Arc<AppState>, cors: CorsLayer) -> Router {
    api_routes(state).layer(cors).layer(http_trace_layer())
}
