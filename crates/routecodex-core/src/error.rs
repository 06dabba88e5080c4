//! Gateway error taxonomy and the client-facing error body.
//!
//! Every failure leaving the gateway is a [`GatewayError`]; internal
//! errors (codec, credential, transport, pipeline) are mapped into it at
//! the layer that decides the failure is terminal. Stack traces never
//! reach the client.

use serde::Serialize;
use serde_json::Value;

use routecodex_auth::CredentialError;
use routecodex_provider::{ProviderCallError, RateLimitCooldownError};

pub const CODE_PROVIDER_NOT_AVAILABLE: &str = "PROVIDER_NOT_AVAILABLE";
pub const CODE_NO_PROVIDER_TARGET: &str = "ERR_NO_PROVIDER_TARGET";

/// How many attempted targets appear verbatim in log lines before the
/// rest collapse into a `+N` suffix.
pub const ATTEMPTED_LOG_LIMIT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Configuration,
    Credential,
    RateLimit,
    Transport,
    Upstream,
    Pipeline,
    Router,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    /// HTTP status returned to the client.
    pub status: u16,
    pub request_id: String,
    pub provider_key: Option<String>,
    pub provider_type: Option<String>,
    pub route_name: Option<String>,
    pub upstream_status: Option<u16>,
    pub upstream_code: Option<String>,
    pub upstream_message: Option<String>,
    pub details: Value,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            status: default_status(kind, &code),
            kind,
            code,
            message: message.into(),
            request_id: String::new(),
            provider_key: None,
            provider_type: None,
            route_name: None,
            upstream_status: None,
            upstream_code: None,
            upstream_message: None,
            details: Value::Null,
        }
    }

    pub fn configuration(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, code, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Timeout, "TIMEOUT_ERROR", message);
        err.status = 504;
        err
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route_name = Some(route.into());
        self
    }

    pub fn with_provider(
        mut self,
        provider_key: impl Into<String>,
        provider_type: impl Into<String>,
    ) -> Self {
        self.provider_key = Some(provider_key.into());
        self.provider_type = Some(provider_type.into());
        self
    }

    /// `All providers unavailable for route ...` with the attempted list.
    pub fn all_unavailable(route: &str, attempted: Vec<String>) -> Self {
        let mut err = Self::new(
            ErrorKind::Router,
            CODE_PROVIDER_NOT_AVAILABLE,
            format!(
                "All providers unavailable for route {route} ({})",
                format_attempted(&attempted)
            ),
        );
        err.status = 502;
        err.route_name = Some(route.to_string());
        err.details = serde_json::json!({"attempted": attempted});
        err
    }

    pub fn from_provider(error: &ProviderCallError) -> Self {
        let kind = if error.status == Some(429) {
            ErrorKind::RateLimit
        } else if error.status.is_some() {
            ErrorKind::Upstream
        } else if error.code == "TIMEOUT_ERROR" {
            ErrorKind::Timeout
        } else {
            ErrorKind::Transport
        };
        let mut err = Self::new(kind, error.code.clone(), error.to_string());
        err.status = client_status_for_upstream(error.status);
        err.upstream_status = error.status;
        err.upstream_code = error.upstream_code.clone();
        err.upstream_message = error.upstream_message.clone();
        err.details = error.details.clone();
        err
    }

    pub fn from_credential(error: &CredentialError) -> Self {
        let mut err = Self::new(ErrorKind::Credential, error.code(), error.to_string());
        err.status = 502;
        err
    }

    pub fn from_cooldown(error: &RateLimitCooldownError) -> Self {
        let mut err = Self::new(ErrorKind::RateLimit, "RATE_LIMIT_COOLDOWN", error.to_string());
        err.status = 429;
        err.details = error.details();
        err
    }

    /// The JSON body sent to the client.
    pub fn body(&self) -> Value {
        let mut error = serde_json::Map::new();
        error.insert("message".to_string(), Value::from(self.message.clone()));
        error.insert("code".to_string(), Value::from(self.code.clone()));
        error.insert("request_id".to_string(), Value::from(self.request_id.clone()));
        if let Some(value) = &self.provider_key {
            error.insert("provider_key".to_string(), Value::from(value.clone()));
        }
        if let Some(value) = &self.provider_type {
            error.insert("provider_type".to_string(), Value::from(value.clone()));
        }
        if let Some(value) = &self.route_name {
            error.insert("route_name".to_string(), Value::from(value.clone()));
        }
        if let Some(value) = self.upstream_status {
            error.insert("upstream_status".to_string(), Value::from(value));
        }
        if let Some(value) = &self.upstream_code {
            error.insert("upstream_code".to_string(), Value::from(value.clone()));
        }
        if let Some(value) = &self.upstream_message {
            error.insert("upstream_message".to_string(), Value::from(value.clone()));
        }
        if !self.details.is_null() {
            error.insert("details".to_string(), self.details.clone());
        }
        serde_json::json!({"error": Value::Object(error)})
    }
}

fn default_status(kind: ErrorKind, code: &str) -> u16 {
    match kind {
        ErrorKind::RateLimit => 429,
        ErrorKind::Timeout => 504,
        ErrorKind::Configuration if code == "INVALID_REQUEST" => 400,
        _ => 502,
    }
}

/// Upstream 429 and auth/client errors pass through; everything else
/// surfaces as a bad gateway.
fn client_status_for_upstream(status: Option<u16>) -> u16 {
    match status {
        Some(429) => 429,
        Some(status) if (400..500).contains(&status) => status,
        _ => 502,
    }
}

pub fn format_attempted(attempted: &[String]) -> String {
    if attempted.len() <= ATTEMPTED_LOG_LIMIT {
        return attempted.join(", ");
    }
    let shown = attempted[..ATTEMPTED_LOG_LIMIT].join(", ");
    format!("{shown} +{}", attempted.len() - ATTEMPTED_LOG_LIMIT)
}
