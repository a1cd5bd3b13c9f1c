//! HTTP middleware for authentication, rate limiting, etc.

use crate::auth::{extract_credential, Identity, IdentityVerifier};
use crate::error::{ErrorBody, ErrorReport, GatewayError};
use crate::headers::HEADER_REQUEST_ID;
use crate::routes::AuthRequirement;
use crate::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const HEADER_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Apply a route's auth requirement, attaching the identity on success
pub async fn authenticate(
    requirement: AuthRequirement,
    request: &mut Request<Body>,
    verifier: &dyn IdentityVerifier,
) -> Result<(), GatewayError> {
    let identity = match requirement {
        AuthRequirement::None => None,
        AuthRequirement::Optional => optional_auth(request.headers(), verifier).await,
        AuthRequirement::Required => Some(required_auth(request.headers(), verifier).await?),
    };

    if let Some(identity) = identity {
        debug!(user_id = %identity.id, "Identity attached");
        request.extensions_mut().insert(identity);
    }

    Ok(())
}

/// Resolve an identity or fail with 401.
///
/// A missing credential fails before the identity service is called.
pub async fn required_auth(
    headers: &HeaderMap,
    verifier: &dyn IdentityVerifier,
) -> Result<Identity, GatewayError> {
    let credential = extract_credential(headers)
        .ok_or_else(|| GatewayError::unauthorized("No token provided"))?;

    let identity = verifier
        .verify(credential)
        .await
        .ok_or_else(|| GatewayError::unauthorized("Invalid or expired token"))?;

    if identity.id.trim().is_empty() {
        return Err(GatewayError::unauthorized("User information not available"));
    }

    Ok(identity)
}

/// Resolve an identity if possible. Never fails the request.
pub async fn optional_auth(
    headers: &HeaderMap,
    verifier: &dyn IdentityVerifier,
) -> Option<Identity> {
    let credential = extract_credential(headers)?;
    let identity = verifier.verify(credential).await;
    if identity.is_none() {
        debug!("Unverifiable credential on optional route, continuing anonymously");
    }
    identity.filter(|i| !i.id.trim().is_empty())
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_identifier(&request, state.config.client_id_header.as_deref());
    let decision = state.limiter.check(&client);
    let limit = HeaderValue::from(state.limiter.max_requests());

    let mut response = if decision.is_admitted() {
        next.run(request).await
    } else {
        warn!(client = %client, "Rate limit exceeded");
        GatewayError::RateLimited.into_response()
    };

    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static(HEADER_RATE_LIMIT_LIMIT), limit);
    headers.insert(
        HeaderName::from_static(HEADER_RATE_LIMIT_REMAINING),
        HeaderValue::from(decision.remaining()),
    );
    response
}

/// Client identifier for rate limiting.
///
/// Uses the first value of the configured header when present, otherwise the
/// peer IP address.
pub fn client_identifier(request: &Request<Body>, header_name: Option<&str>) -> String {
    let from_header = header_name
        .and_then(|name| request.headers().get(name))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(client) = from_header {
        return client.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Request ID middleware - keeps or assigns `x-request-id`
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        // Forwarded downstream by the proxy
        request
            .headers_mut()
            .insert(HeaderName::from_static(HEADER_REQUEST_ID), value.clone());
    }
    request.extensions_mut().insert(RequestId(request_id));

    let mut response = next.run(request).await;
    if let Some(value) = header_value {
        response
            .headers_mut()
            .insert(HeaderName::from_static(HEADER_REQUEST_ID), value);
    }
    response
}

/// Request ID extension
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        request_id = %request_id,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    response
}

/// Terminal error stage.
///
/// Every failure response passes through here: it is logged once, and outside
/// production the diagnostic `error` object is added to the body.
pub async fn error_response_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let mut response = next.run(request).await;
    let Some(report) = response.extensions_mut().remove::<ErrorReport>() else {
        return response;
    };

    if report.status >= 500 {
        error!(method = %method, uri = %uri, status = report.status, "{}", report.message);
    } else {
        debug!(method = %method, uri = %uri, status = report.status, "{}", report.message);
    }

    if !state.config.environment.exposes_error_details() {
        return response;
    }

    let body = ErrorBody {
        message: report.message.clone(),
        error: Some(report),
    };
    let bytes = match serde_json::to_vec(&body) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to serialize error details: {}", e);
            return response;
        }
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Verifier accepting exactly one token
    struct StubVerifier {
        token: &'static str,
        user_id: &'static str,
        calls: AtomicUsize,
    }

    impl StubVerifier {
        fn new(token: &'static str) -> Self {
            Self::returning(token, "user-1")
        }

        /// Accepts `token` but resolves it to `user_id`
        fn returning(token: &'static str, user_id: &'static str) -> Self {
            Self {
                token,
                user_id,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityVerifier for StubVerifier {
        async fn verify(&self, credential: &str) -> Option<Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let token = crate::auth::extract_bearer_token(credential).unwrap_or(credential);
            (token == self.token).then(|| Identity::new(self.user_id))
        }
    }

    fn request_with_auth(credential: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/content/create");
        if let Some(credential) = credential {
            builder = builder.header(header::AUTHORIZATION, credential);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_required_without_credential_skips_verifier() {
        let verifier = StubVerifier::new("good");
        let mut request = request_with_auth(None);

        let err = authenticate(AuthRequirement::Required, &mut request, &verifier)
            .await
            .unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
        assert!(request.extensions().get::<Identity>().is_none());
    }

    #[tokio::test]
    async fn test_required_with_bad_credential() {
        let verifier = StubVerifier::new("good");
        let mut request = request_with_auth(Some("Bearer bad"));

        let err = authenticate(AuthRequirement::Required, &mut request, &verifier)
            .await
            .unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_required_with_good_credential_attaches_identity() {
        let verifier = StubVerifier::new("good");
        let mut request = request_with_auth(Some("good"));

        authenticate(AuthRequirement::Required, &mut request, &verifier)
            .await
            .unwrap();

        assert_eq!(request.extensions().get::<Identity>().unwrap().id, "user-1");
    }

    #[tokio::test]
    async fn test_optional_tolerates_bad_or_missing_credential() {
        let verifier = StubVerifier::new("good");

        let mut missing = request_with_auth(None);
        authenticate(AuthRequirement::Optional, &mut missing, &verifier)
            .await
            .unwrap();
        assert!(missing.extensions().get::<Identity>().is_none());

        let mut bad = request_with_auth(Some("Bearer bad"));
        authenticate(AuthRequirement::Optional, &mut bad, &verifier)
            .await
            .unwrap();
        assert!(bad.extensions().get::<Identity>().is_none());

        let mut good = request_with_auth(Some("Bearer good"));
        authenticate(AuthRequirement::Optional, &mut good, &verifier)
            .await
            .unwrap();
        assert!(good.extensions().get::<Identity>().is_some());
    }

    #[tokio::test]
    async fn test_required_with_empty_identity_is_rejected() {
        let verifier = StubVerifier::returning("good", "");
        let mut request = request_with_auth(Some("Bearer good"));

        let err = authenticate(AuthRequirement::Required, &mut request, &verifier)
            .await
            .unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(err.message(), "User information not available");
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert!(request.extensions().get::<Identity>().is_none());
    }

    #[tokio::test]
    async fn test_optional_with_empty_identity_continues_anonymously() {
        let verifier = StubVerifier::returning("good", "  ");
        let mut request = request_with_auth(Some("Bearer good"));

        authenticate(AuthRequirement::Optional, &mut request, &verifier)
            .await
            .unwrap();

        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert!(request.extensions().get::<Identity>().is_none());
    }

    #[tokio::test]
    async fn test_none_never_calls_verifier() {
        let verifier = StubVerifier::new("good");
        let mut request = request_with_auth(Some("Bearer good"));

        authenticate(AuthRequirement::None, &mut request, &verifier)
            .await
            .unwrap();

        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
        assert!(request.extensions().get::<Identity>().is_none());
    }

    #[test]
    fn test_client_identifier() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 5000))));

        assert_eq!(client_identifier(&request, Some("x-forwarded-for")), "203.0.113.9");
        assert_eq!(client_identifier(&request, None), "192.0.2.1");
        assert_eq!(client_identifier(&request, Some("x-api-key")), "192.0.2.1");

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_identifier(&bare, None), "unknown");
    }
}
