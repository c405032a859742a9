//! Service routes.

use axum::extract::State;
use axum::http::Uri;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::error::AppError;

/// Static details reported by the health route.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub environment: String,
    pub version: &'static str,
}

impl ServiceInfo {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Health route response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub message: &'static str,
    pub status: &'static str,
    pub timestamp: String,
    pub environment: String,
    pub version: &'static str,
}

pub async fn health(State(info): State<Arc<ServiceInfo>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "Car Rental API is running!",
        status: "OK",
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        environment: info.environment.clone(),
        version: info.version,
    })
}

pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}
