//! Credential verification against the identity service

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

/// Identity resolved from a verified credential.
///
/// Lives in the request extensions for the duration of one request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Identity {
    /// User id as reported by the identity service
    pub id: String,
    /// Remaining fields of the identity payload
    pub claims: Map<String, Value>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            claims: Map::new(),
        }
    }

    /// Build an identity from the verification payload.
    ///
    /// Accepts the id as a string or number, either at the top level or
    /// inside a `user` object.
    pub fn from_payload(payload: Value) -> Option<Self> {
        let mut fields = match payload {
            Value::Object(fields) => fields,
            _ => return None,
        };

        if !fields.contains_key("id") {
            if let Some(Value::Object(user)) = fields.remove("user") {
                fields = user;
            }
        }

        let id = match fields.remove("id")? {
            Value::String(id) => id,
            Value::Number(id) => id.to_string(),
            _ => return None,
        };

        Some(Self { id, claims: fields })
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

/// Resolves credentials to identities.
///
/// Failure of any kind is `None`; callers decide whether that is fatal.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Option<Identity>;
}

/// Verifier backed by the identity service's verification endpoint
pub struct HttpIdentityVerifier {
    http: reqwest::Client,
    verify_url: String,
}

impl HttpIdentityVerifier {
    pub fn new(http: reqwest::Client, verify_url: impl Into<String>) -> Self {
        Self {
            http,
            verify_url: verify_url.into(),
        }
    }

    pub fn verify_url(&self) -> &str {
        &self.verify_url
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    #[instrument(skip(self, credential), fields(url = %self.verify_url))]
    async fn verify(&self, credential: &str) -> Option<Identity> {
        let response = match self
            .http
            .post(&self.verify_url)
            .header(header::AUTHORIZATION, normalize_bearer(credential))
            .json(&serde_json::json!({}))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Identity service unreachable: {}", e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!(status = %status.as_u16(), "Credential rejected by identity service");
            return None;
        }

        match response.json::<Value>().await {
            Ok(payload) => {
                let identity = Identity::from_payload(payload);
                if identity.is_none() {
                    debug!("Identity payload has no usable id");
                }
                identity
            }
            Err(e) => {
                debug!("Malformed identity payload: {}", e);
                None
            }
        }
    }
}

/// Prefix the credential with the bearer scheme unless it already has it
pub fn normalize_bearer(credential: &str) -> String {
    let credential = credential.trim();
    match extract_bearer_token(credential) {
        Some(token) => format!("Bearer {}", token),
        None => format!("Bearer {}", credential),
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

/// Raw credential from the Authorization header, if present and non-blank
pub fn extract_credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|c| !c.is_empty())
}
