//! HTTP surface: router, middleware and server.

mod middleware;
mod routes;
mod server;

pub use middleware::{
    client_ip, log_request, rate_limit, resolved_client_ip, ClientAddr, RateLimitGate,
    RateLimitRejection, UNKNOWN_ADDR,
};
pub use routes::{HealthResponse, ServiceInfo};
pub use server::HttpServer;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::ratelimit::RateLimiter;

/// Build the service router.
///
/// The rate limiter is the outermost layer, so rejected requests never reach
/// the request logger or any handler.
pub fn router(config: &ServerConfig, limiter: Arc<RateLimiter>) -> Router {
    let info = Arc::new(ServiceInfo::new(config.environment.clone()));
    let gate = RateLimitGate::new(limiter, config.trust_forwarded_for);

    Router::new()
        .route("/", get(routes::health))
        .fallback(routes::not_found)
        .with_state(info)
        .layer(axum::middleware::from_fn(log_request))
        .layer(axum::middleware::from_fn_with_state(gate, rate_limit))
}
