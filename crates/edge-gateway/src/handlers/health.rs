//! Liveness endpoint

use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `GET /health`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// GET /health - Always 200, independent of rate limiting and routing
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthStatus {
            status: "UP".to_string(),
            message: "API Gateway is running".to_string(),
            timestamp: Utc::now(),
        }),
    )
}
