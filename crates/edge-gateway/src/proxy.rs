//! Outbound calls to downstream services
//!
//! One attempt per call, bounded by the client timeout. Failures come back
//! as [`GatewayError`] in one of two shapes:
//! - the service answered with a non-2xx status ([`GatewayError::Upstream`])
//! - no response arrived at all ([`GatewayError::Unavailable`], 503)

use crate::error::{GatewayError, GENERIC_SERVICE_ERROR};
use crate::headers::filter_forward_headers;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// A call to forward to a downstream service
#[derive(Debug)]
pub struct ProxyRequest<'a> {
    /// Target base URL
    pub target: &'a str,
    /// Path relative to the target
    pub path: &'a str,
    /// Raw query string, without the `?`
    pub query: Option<&'a str>,
    pub method: Method,
    /// Inbound headers, filtered before sending
    pub headers: &'a HeaderMap,
    pub body: Option<Bytes>,
}

/// A successful downstream response, relayed as-is
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// HTTP proxy to downstream services
#[derive(Clone)]
pub struct ServiceProxy {
    http: reqwest::Client,
}

impl ServiceProxy {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Build the shared outbound client. Every call is bounded by `timeout`.
    pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder().timeout(timeout).build()
    }

    /// Forward a request and normalize the outcome.
    ///
    /// Dropping the returned future aborts the outbound call.
    #[instrument(skip_all, fields(method = %request.method, target = %request.target, path = %request.path))]
    pub async fn forward(&self, request: ProxyRequest<'_>) -> Result<UpstreamResponse, GatewayError> {
        let url = join_url(request.target, request.path, request.query);
        let headers = filter_forward_headers(request.headers);

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(headers);

        if carries_body(&request.method) {
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
        }

        debug!("Forwarding {} {}", request.method, url);
        let response = builder.send().await.map_err(|e| {
            warn!("Downstream call to {} failed: {}", url, e);
            GatewayError::unavailable(e)
        })?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|e| {
            warn!("Reading downstream response from {} failed: {}", url, e);
            GatewayError::unavailable(e)
        })?;

        if !status.is_success() {
            debug!(status = %status.as_u16(), "Downstream returned an error");
            return Err(upstream_error(status, &body));
        }

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Methods whose request body is forwarded
pub fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Map a non-2xx downstream response to a normalized error.
///
/// The message is taken from `message`, then `error.message`, then a
/// generic fallback. The raw payload is preserved.
pub fn upstream_error(status: StatusCode, body: &[u8]) -> GatewayError {
    let payload = match serde_json::from_slice::<Value>(body) {
        Ok(value) => Some(value),
        Err(_) if body.is_empty() => None,
        Err(_) => Some(Value::String(String::from_utf8_lossy(body).into_owned())),
    };

    let message = payload
        .as_ref()
        .and_then(extract_message)
        .unwrap_or(GENERIC_SERVICE_ERROR)
        .to_string();

    GatewayError::Upstream {
        status,
        message,
        payload,
    }
}

fn extract_message(payload: &Value) -> Option<&str> {
    fn non_empty(v: &Value) -> Option<&str> {
        v.as_str().filter(|s| !s.is_empty())
    }

    payload
        .get("message")
        .and_then(non_empty)
        .or_else(|| payload.pointer("/error/message").and_then(non_empty))
}

fn join_url(target: &str, path: &str, query: Option<&str>) -> String {
    let mut url = target.trim_end_matches('/').to_string();
    if !path.is_empty() && !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn proxy() -> ServiceProxy {
        ServiceProxy::new(ServiceProxy::build_client(Duration::from_secs(5)).unwrap())
    }

    fn inbound_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.insert("x-trace", HeaderValue::from_static("abc"));
        headers
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://svc/api/content", "/create", None), "http://svc/api/content/create");
        assert_eq!(join_url("http://svc/api/content/", "", None), "http://svc/api/content");
        assert_eq!(join_url("http://svc", "items", Some("page=2")), "http://svc/items?page=2");
        assert_eq!(join_url("http://svc", "/items", Some("")), "http://svc/items");
    }

    #[test]
    fn test_carries_body() {
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::PUT));
        assert!(carries_body(&Method::PATCH));
        assert!(!carries_body(&Method::GET));
        assert!(!carries_body(&Method::DELETE));
        assert!(!carries_body(&Method::HEAD));
    }

    #[test]
    fn test_upstream_error_message_fallbacks() {
        let top = upstream_error(StatusCode::FORBIDDEN, br#"{"message":"X"}"#);
        assert_eq!(top.message(), "X");
        assert_eq!(top.status(), StatusCode::FORBIDDEN);
        assert_eq!(top.payload(), Some(&json!({ "message": "X" })));

        let nested = upstream_error(StatusCode::BAD_REQUEST, br#"{"error":{"message":"nested"}}"#);
        assert_eq!(nested.message(), "nested");

        let empty = upstream_error(StatusCode::BAD_REQUEST, br#"{"message":"","error":{"message":"inner"}}"#);
        assert_eq!(empty.message(), "inner");

        let generic = upstream_error(StatusCode::INTERNAL_SERVER_ERROR, br#"{"status":"fail"}"#);
        assert_eq!(generic.message(), GENERIC_SERVICE_ERROR);

        let text = upstream_error(StatusCode::BAD_GATEWAY, b"upstream exploded");
        assert_eq!(text.message(), GENERIC_SERVICE_ERROR);
        assert_eq!(text.payload(), Some(&json!("upstream exploded")));

        let no_body = upstream_error(StatusCode::NOT_FOUND, b"");
        assert_eq!(no_body.payload(), None);
    }

    #[tokio::test]
    async fn test_forward_post_with_body_and_filtered_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/content/create"))
            .and(body_json(json!({ "title": "hello" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "c1" })))
            .expect(1)
            .mount(&server)
            .await;

        let headers = inbound_headers();
        let target = format!("{}/api/content", server.uri());
        let response = proxy()
            .forward(ProxyRequest {
                target: &target,
                path: "/create",
                query: None,
                method: Method::POST,
                headers: &headers,
                body: Some(Bytes::from_static(br#"{"title":"hello"}"#)),
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body, Bytes::from_static(br#"{"id":"c1"}"#));

        let received = server.received_requests().await.unwrap();
        let sent = &received[0];
        assert!(sent.headers.get("user-agent").is_none());
        assert!(sent.headers.get("accept-encoding").is_none());
        assert_ne!(sent.headers.get("host").unwrap(), "gateway.local");
        assert_eq!(sent.headers.get("authorization").unwrap(), "Bearer t");
        assert_eq!(sent.headers.get("x-trace").unwrap(), "abc");
        assert_eq!(sent.headers.get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_forward_get_drops_body_and_keeps_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/content/getAllContent"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let headers = HeaderMap::new();
        let target = format!("{}/api/content", server.uri());
        proxy()
            .forward(ProxyRequest {
                target: &target,
                path: "/getAllContent",
                query: Some("page=2"),
                method: Method::GET,
                headers: &headers,
                body: Some(Bytes::from_static(b"ignored")),
            })
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        assert!(received[0].body.is_empty());
    }

    #[tokio::test]
    async fn test_forward_maps_downstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "X" })))
            .mount(&server)
            .await;

        let headers = HeaderMap::new();
        let target = server.uri();
        let err = proxy()
            .forward(ProxyRequest {
                target: &target,
                path: "/delete/1",
                query: None,
                method: Method::DELETE,
                headers: &headers,
                body: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.message(), "X");
    }

    #[tokio::test]
    async fn test_forward_unreachable_is_503() {
        let headers = HeaderMap::new();
        let err = proxy()
            .forward(ProxyRequest {
                target: "http://127.0.0.1:1",
                path: "/anything",
                query: None,
                method: Method::GET,
                headers: &headers,
                body: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.message().starts_with("Service temporarily unavailable: "));
    }

    #[tokio::test]
    async fn test_forward_timeout_is_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let slow = ServiceProxy::new(ServiceProxy::build_client(Duration::from_millis(100)).unwrap());
        let headers = HeaderMap::new();
        let target = server.uri();
        let err = slow
            .forward(ProxyRequest {
                target: &target,
                path: "/slow",
                query: None,
                method: Method::GET,
                headers: &headers,
                body: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
