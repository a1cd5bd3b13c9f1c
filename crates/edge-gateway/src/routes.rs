//! Route table, request dispatch and HTTP router assembly

use crate::auth::{Identity, IdentityVerifier};
use crate::error::GatewayError;
use crate::headers::HEADER_USER_ID;
use crate::middleware::{self, authenticate};
use crate::proxy::{carries_body, ProxyRequest, ServiceProxy};
use crate::{handlers, AppState};
use axum::{
    body::{to_bytes, Body, Bytes},
    http::{HeaderName, HeaderValue, Method, Request},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use http_body_util::LengthLimitError;
use serde_json::Value;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;

/// Identity requirement of a route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthRequirement {
    /// No verification
    #[default]
    None,
    /// Attach an identity when the credential verifies, continue otherwise
    Optional,
    /// Reject with 401 unless the credential verifies
    Required,
}

/// Static mapping from a path prefix to a downstream service
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRule {
    /// Path prefix, matched on whole segments
    pub prefix: String,
    /// Target base URL; the path suffix after `prefix` is appended to it
    pub target: String,
    /// Requirement for every method not covered by `write_auth`
    pub auth: AuthRequirement,
    /// Requirement for POST, PUT, PATCH and DELETE, if different
    pub write_auth: Option<AuthRequirement>,
    /// Set `authorId` in JSON create/update bodies to the caller's id
    pub inject_author: bool,
}

impl RouteRule {
    pub fn new(prefix: impl Into<String>, target: impl Into<String>, auth: AuthRequirement) -> Self {
        Self {
            prefix: normalize_prefix(&prefix.into()),
            target: target.into(),
            auth,
            write_auth: None,
            inject_author: false,
        }
    }

    pub fn with_write_auth(mut self, requirement: AuthRequirement) -> Self {
        self.write_auth = Some(requirement);
        self
    }

    pub fn injecting_author(mut self) -> Self {
        self.inject_author = true;
        self
    }

    /// Requirement applying to `method`
    pub fn requirement_for(&self, method: &Method) -> AuthRequirement {
        let is_write = matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );
        match self.write_auth {
            Some(write) if is_write => write,
            _ => self.auth,
        }
    }

    /// Path remaining after this rule's prefix, if the prefix matches.
    ///
    /// A suffix that could resolve outside the target's path is not a match.
    fn strip<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if !(rest.is_empty() || rest.starts_with('/')) || escapes_target(rest) {
            return None;
        }
        Some(rest)
    }
}

/// True when `suffix` has a dot segment or an encoded separator, in any case
fn escapes_target(suffix: &str) -> bool {
    suffix.split('/').any(|segment| {
        let lower = segment.to_ascii_lowercase();
        if lower.contains("%2f") || lower.contains("%5c") || lower.contains('\\') {
            return true;
        }
        let decoded = lower.replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

/// True when reading the body failed on the size limit
fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Ordered, immutable route table.
///
/// Rules are kept longest prefix first so the first match is the most
/// specific one; rules with equal prefix length keep their configured order.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Match `path` against the table, returning the rule and the suffix path
    pub fn resolve<'p>(&self, path: &'p str) -> Option<(&RouteRule, &'p str)> {
        self.rules
            .iter()
            .find_map(|rule| rule.strip(path).map(|suffix| (rule, suffix)))
    }
}

/// Per-request orchestration: route match, auth, proxy
pub struct Dispatcher {
    routes: RouteTable,
    verifier: Arc<dyn IdentityVerifier>,
    proxy: ServiceProxy,
    max_body_size: usize,
}

impl Dispatcher {
    pub fn new(
        routes: RouteTable,
        verifier: Arc<dyn IdentityVerifier>,
        proxy: ServiceProxy,
        max_body_size: usize,
    ) -> Self {
        Self {
            routes,
            verifier,
            proxy,
            max_body_size,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handle one inbound request
    pub async fn dispatch(&self, mut request: Request<Body>) -> Result<Response, GatewayError> {
        let path = request.uri().path().to_string();
        let (rule, suffix) = self
            .routes
            .resolve(&path)
            .ok_or(GatewayError::RouteNotFound)?;

        debug!(prefix = %rule.prefix, suffix = %suffix, "Route matched");

        let requirement = rule.requirement_for(request.method());
        authenticate(requirement, &mut request, self.verifier.as_ref()).await?;

        let (mut parts, body) = request.into_parts();
        let identity = parts.extensions.remove::<Identity>();

        // Only an identity verified above may reach downstream services
        parts.headers.remove(HEADER_USER_ID);
        if let Some(identity) = &identity {
            let value = HeaderValue::from_str(&identity.id)
                .map_err(|_| GatewayError::internal("Identity id is not a valid header value"))?;
            parts
                .headers
                .insert(HeaderName::from_static(HEADER_USER_ID), value);
        }

        let body = if carries_body(&parts.method) {
            let bytes = to_bytes(body, self.max_body_size).await.map_err(|e| {
                if is_length_limit(&e) {
                    GatewayError::PayloadTooLarge
                } else {
                    GatewayError::InvalidRequest(format!("Request body could not be read: {}", e))
                }
            })?;
            match &identity {
                Some(identity) if rule.inject_author => Some(with_author(bytes, &identity.id)),
                _ => Some(bytes),
            }
        } else {
            None
        };

        let upstream = self
            .proxy
            .forward(ProxyRequest {
                target: &rule.target,
                path: suffix,
                query: parts.uri.query(),
                method: parts.method.clone(),
                headers: &parts.headers,
                body,
            })
            .await?;

        Ok(upstream.into_response())
    }
}

/// Set `authorId` on a JSON object body. Other bodies pass through unchanged.
fn with_author(body: Bytes, author_id: &str) -> Bytes {
    let fields = if body.iter().all(u8::is_ascii_whitespace) {
        Some(serde_json::Map::new())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(fields)) => Some(fields),
            _ => None,
        }
    };

    let Some(mut fields) = fields else {
        return body;
    };
    fields.insert("authorId".to_string(), Value::String(author_id.to_string()));

    serde_json::to_vec(&fields).map(Bytes::from).unwrap_or(body)
}

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Everything except /health is rate limited and dispatched
    let gateway = Router::new()
        .fallback(handlers::proxy_request)
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::rate_limit_middleware,
        ));

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(gateway)
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::error_response_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware));

    if state.config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any);
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
