//! Catch-all handler that hands requests to the dispatcher

use crate::{AppState, GatewayError};
use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
};
use std::sync::Arc;

/// ANY /{*path} - Route, authenticate and forward
pub async fn proxy_request(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    state.dispatcher.dispatch(request).await
}
