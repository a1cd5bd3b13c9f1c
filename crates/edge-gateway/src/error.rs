//! Error types and the normalized error shape

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Message used when an error carries no message of its own
pub const DEFAULT_ERROR_MESSAGE: &str = "Internal Server Error";

/// Message used when an upstream error body has no readable message
pub const GENERIC_SERVICE_ERROR: &str = "Service error";

/// Broad failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed, unauthenticated or throttled request
    Client,
    /// Downstream service answered with a failure
    Upstream,
    /// Downstream service could not be reached
    Unavailable,
    /// Unexpected gateway-side fault
    Internal,
}

/// Gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("Route not found")]
    RouteNotFound,

    #[error("Too many requests, please try again later.")]
    RateLimited,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("{message}")]
    Upstream {
        status: StatusCode,
        message: String,
        payload: Option<serde_json::Value>,
    },

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Transport-level failure reaching a downstream service
    pub fn unavailable(cause: impl std::fmt::Display) -> Self {
        Self::Unavailable(format!("Service temporarily unavailable: {}", cause))
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unauthorized(_)
            | Self::RouteNotFound
            | Self::RateLimited
            | Self::InvalidRequest(_)
            | Self::PayloadTooLarge => ErrorClass::Client,
            Self::Upstream { .. } => ErrorClass::Upstream,
            Self::Unavailable(_) => ErrorClass::Unavailable,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Get the HTTP status code
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream { status, .. } => *status,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-facing message, never empty
    pub fn message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            message
        }
    }

    /// Raw downstream payload, kept for diagnostics
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Upstream { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            class: self.class(),
            status: self.status().as_u16(),
            message: self.message(),
            payload: self.payload().cloned(),
        }
    }
}

/// Diagnostic view of a failure.
///
/// Attached to error responses as an extension; the terminal error stage
/// decides whether it is serialized into the body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub class: ErrorClass,
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// JSON body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let report = self.report();
        let body = ErrorBody {
            message: report.message.clone(),
            error: None,
        };

        let mut response = (self.status(), Json(body)).into_response();
        response.extensions_mut().insert(report);
        response
    }
}
