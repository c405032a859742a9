//! Request middleware: rate limiting and request logging.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{AUTHORIZATION, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::ErrorBody;
use crate::ratelimit::{Decision, RateLimitKey, RateLimiter};

/// Address used when the peer address is not available.
pub const UNKNOWN_ADDR: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";

/// State handed to [`rate_limit`].
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: Arc<RateLimiter>,
    trust_forwarded_for: bool,
}

impl RateLimitGate {
    pub fn new(limiter: Arc<RateLimiter>, trust_forwarded_for: bool) -> Self {
        Self {
            limiter,
            trust_forwarded_for,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

/// Resolve the client address of a request.
///
/// The first `X-Forwarded-For` entry is used only when proxies are trusted;
/// otherwise the connection's peer address.
pub fn client_ip(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(ip) = forwarded_for(request.headers()) {
            return ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_ADDR.to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Rejection returned for a rate-limited request.
#[derive(Debug)]
pub struct RateLimitRejection {
    message: String,
    retry_after_secs: u64,
}

impl RateLimitRejection {
    /// Build a rejection from a non-allowing decision.
    pub fn from_decision(decision: &Decision) -> Option<Self> {
        Some(Self {
            message: decision.rejection_message()?,
            retry_after_secs: decision.retry_after_secs()?,
        })
    }
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            message: self.message,
            code: None,
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        response
    }
}

/// Admit or reject a request based on its client key.
///
/// The key is the raw `Authorization` header value (or `anon`) combined with
/// the client address.
pub async fn rate_limit(State(gate): State<RateLimitGate>, mut request: Request, next: Next) -> Response {
    let source = client_ip(&request, gate.trust_forwarded_for);
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let key = RateLimitKey::from_parts(token, &source);

    let decision = gate.limiter.check(&key);
    match RateLimitRejection::from_decision(&decision) {
        None => {
            request.extensions_mut().insert(ClientAddr(source));
            next.run(request).await
        }
        Some(rejection) => {
            debug!(key = %key, decision = ?decision, "Rejecting request");
            rejection.into_response()
        }
    }
}

/// Client address resolved by [`rate_limit`], stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

/// Client address to report for a request.
///
/// Prefers the address the rate limiter keyed the request by, so both agree
/// behind a trusted proxy.
pub fn resolved_client_ip(request: &Request) -> String {
    match request.extensions().get::<ClientAddr>() {
        Some(ClientAddr(addr)) => addr.clone(),
        None => client_ip(request, false),
    }
}

/// Log each completed request with its status and latency.
pub async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let ip = resolved_client_ip(&request);

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        ip = %ip,
        "Request completed"
    );
    response
}
