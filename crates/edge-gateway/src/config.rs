//! Gateway configuration

use crate::routes::{AuthRequirement, RouteRule};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Operating mode. Only affects how much error detail reaches callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    /// Whether error responses may carry the internal `error` object
    pub fn exposes_error_details(&self) -> bool {
        !matches!(self, Self::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Identity (auth/user) service base URL
    pub auth_service_url: String,
    /// Content service base URL
    pub content_service_url: String,
    /// Comment service base URL
    pub comment_service_url: String,
    /// Rate limit window length (milliseconds)
    pub rate_limit_window_ms: u64,
    /// Maximum requests per client per window
    pub rate_limit_max_requests: u32,
    /// Header whose first value identifies the client (e.g. `x-forwarded-for`).
    /// Falls back to the peer address when unset or absent.
    pub client_id_header: Option<String>,
    /// How often stale rate limit entries are evicted (milliseconds)
    pub eviction_interval_ms: u64,
    /// Timeout for every downstream call (milliseconds)
    pub upstream_timeout_ms: u64,
    /// Maximum inbound request body size (bytes)
    pub max_body_size: usize,
    /// Operating mode
    pub environment: Environment,
    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth_service_url: "http://localhost:8000".to_string(),
            content_service_url: "http://localhost:3001".to_string(),
            comment_service_url: "http://localhost:4000".to_string(),
            rate_limit_window_ms: 15 * 60 * 1000, // 15 minutes
            rate_limit_max_requests: 100,
            client_id_header: None,
            eviction_interval_ms: 15 * 60 * 1000,
            upstream_timeout_ms: 10_000,
            max_body_size: 10 * 1024 * 1024, // 10 MB
            environment: Environment::Development,
            cors_enabled: true,
        }
    }
}

impl GatewayConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Verification endpoint of the identity service
    pub fn verify_url(&self) -> String {
        format!("{}/api/auth/verify", self.auth_service_url.trim_end_matches('/'))
    }

    /// Build the static route table from the configured service URLs
    pub fn route_rules(&self) -> Vec<RouteRule> {
        vec![
            RouteRule::new(
                "/api/auth",
                service_target(&self.auth_service_url, "/api/auth"),
                AuthRequirement::None,
            ),
            RouteRule::new(
                "/api/content",
                service_target(&self.content_service_url, "/api/content"),
                AuthRequirement::Optional,
            )
            .with_write_auth(AuthRequirement::Required)
            .injecting_author(),
            RouteRule::new(
                "/api/comment",
                service_target(&self.comment_service_url, "/api/comment"),
                AuthRequirement::Optional,
            )
            .with_write_auth(AuthRequirement::Required)
            .injecting_author(),
        ]
    }

    /// Check the configuration before the server starts
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rate_limit_max_requests == 0 {
            anyhow::bail!("rate limit max requests must be greater than zero");
        }
        if self.rate_limit_window_ms == 0 {
            anyhow::bail!("rate limit window must be greater than zero");
        }
        if self.upstream_timeout_ms == 0 {
            anyhow::bail!("upstream timeout must be greater than zero");
        }
        if self.eviction_interval_ms == 0 {
            anyhow::bail!("eviction interval must be greater than zero");
        }

        for (name, raw) in [
            ("auth", &self.auth_service_url),
            ("content", &self.content_service_url),
            ("comment", &self.comment_service_url),
        ] {
            let parsed = url::Url::parse(raw)
                .map_err(|e| anyhow::anyhow!("invalid {} service URL '{}': {}", name, raw, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("{} service URL '{}' must use http or https", name, raw);
            }
        }

        Ok(())
    }
}

fn service_target(base_url: &str, namespace: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("development", Environment::Development)]
    #[case("DEV", Environment::Development)]
    #[case("test", Environment::Test)]
    #[case(" Production ", Environment::Production)]
    #[case("prod", Environment::Production)]
    fn test_parse_environment(#[case] raw: &str, #[case] expected: Environment) {
        assert_eq!(raw.parse::<Environment>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_environment() {
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_only_production_hides_details() {
        assert!(Environment::Development.exposes_error_details());
        assert!(Environment::Test.exposes_error_details());
        assert!(!Environment::Production.exposes_error_details());
    }

    #[test]
    fn test_route_rules_use_service_urls() {
        let config = GatewayConfig {
            content_service_url: "http://content:3001/".to_string(),
            ..Default::default()
        };

        let rules = config.route_rules();
        assert_eq!(rules.len(), 3);

        let content = rules.iter().find(|r| r.prefix == "/api/content").unwrap();
        assert_eq!(content.target, "http://content:3001/api/content");
        assert_eq!(content.auth, AuthRequirement::Optional);
        assert_eq!(content.write_auth, Some(AuthRequirement::Required));
        assert!(content.inject_author);

        let auth = rules.iter().find(|r| r.prefix == "/api/auth").unwrap();
        assert_eq!(auth.auth, AuthRequirement::None);
        assert!(!auth.inject_author);
    }

    #[test]
    fn test_verify_url() {
        let config = GatewayConfig {
            auth_service_url: "http://auth:8000/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.verify_url(), "http://auth:8000/api/auth/verify");
    }

    #[test]
    fn test_validate() {
        assert!(GatewayConfig::default().validate().is_ok());

        let zero_max = GatewayConfig {
            rate_limit_max_requests: 0,
            ..Default::default()
        };
        assert!(zero_max.validate().is_err());

        let bad_url = GatewayConfig {
            comment_service_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(bad_url.validate().is_err());

        let bad_scheme = GatewayConfig {
            auth_service_url: "ftp://auth".to_string(),
            ..Default::default()
        };
        assert!(bad_scheme.validate().is_err());
    }
}
