//! Application state

use crate::auth::{HttpIdentityVerifier, IdentityVerifier};
use crate::config::GatewayConfig;
use crate::proxy::ServiceProxy;
use crate::rate_limit::FixedWindowLimiter;
use crate::routes::{Dispatcher, RouteTable};
use std::sync::Arc;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Route matching, auth and proxying
    pub dispatcher: Dispatcher,
    /// Per-client request counters
    pub limiter: Arc<FixedWindowLimiter>,
}

impl AppState {
    /// Create a new application state backed by the configured identity service
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let http = ServiceProxy::build_client(config.upstream_timeout())?;
        let verifier = Arc::new(HttpIdentityVerifier::new(http.clone(), config.verify_url()));
        info!("Identity verification: {}", verifier.verify_url());
        Self::assemble(config, http, verifier)
    }

    /// Create a state with a custom identity verifier
    pub fn with_verifier(
        config: GatewayConfig,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> anyhow::Result<Self> {
        let http = ServiceProxy::build_client(config.upstream_timeout())?;
        Self::assemble(config, http, verifier)
    }

    fn assemble(
        config: GatewayConfig,
        http: reqwest::Client,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let routes = RouteTable::new(config.route_rules());
        for rule in routes.rules() {
            info!(
                "Route {} -> {} (auth: {:?}, writes: {:?})",
                rule.prefix, rule.target, rule.auth, rule.write_auth
            );
        }

        let dispatcher = Dispatcher::new(
            routes,
            verifier,
            ServiceProxy::new(http),
            config.max_body_size,
        );

        let limiter = Arc::new(FixedWindowLimiter::new(
            config.rate_limit_window(),
            config.rate_limit_max_requests,
        ));

        Ok(Self {
            config,
            dispatcher,
            limiter,
        })
    }
}
