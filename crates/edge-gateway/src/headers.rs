//! Header filtering for the gateway-to-service hop

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

/// Header carrying the resolved identity id to downstream services
pub const HEADER_USER_ID: &str = "x-user-id";

/// Header carrying the per-request correlation id
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Headers that only make sense on the client-to-gateway hop
pub const EXCLUDED_HEADERS: [HeaderName; 5] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::ACCEPT_ENCODING,
    header::USER_AGENT,
];

/// Whether a header must not be forwarded downstream.
///
/// `HeaderName` is always stored lowercase, so this comparison is
/// case-insensitive with respect to what the client sent.
pub fn is_excluded(name: &HeaderName) -> bool {
    EXCLUDED_HEADERS.contains(name)
}

/// Copy the inbound headers minus the excluded set.
///
/// A JSON content type is added when the caller did not send one.
pub fn filter_forward_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(inbound.len() + 1);

    for (name, value) in inbound.iter() {
        if is_excluded(name) {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }

    if !forwarded.contains_key(header::CONTENT_TYPE) {
        forwarded.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }

    forwarded
}
