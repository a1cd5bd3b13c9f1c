//! # Edge Gateway
//!
//! Single public entry point in front of the auth, content and comment
//! services.
//!
//! This crate provides:
//! - **Routing**: Static prefix table mapping paths to downstream services
//! - **Authentication**: Bearer credentials verified by the identity service
//! - **Rate Limiting**: Fixed-window request counting per client
//! - **Error Normalization**: One `{message, error?}` shape for every failure
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   HTTP Clients                      │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                    Edge Gateway                     │
//! ├─────────────────────────────────────────────────────┤
//! │  Rate Limiter │ Route Table │ Auth (opt / required) │
//! ├─────────────────────────────────────────────────────┤
//! │        Service Proxy (header filter, timeout)       │
//! └───────┬──────────────────┬──────────────────┬───────┘
//!         │                  │                  │
//!   auth service      content service    comment service
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod headers;
pub mod middleware;
pub mod proxy;
pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{Identity, IdentityVerifier};
pub use config::{Environment, GatewayConfig};
pub use error::GatewayError;
pub use server::{run_server, run_server_with_shutdown};
pub use state::AppState;
