pub mod env;
pub mod home;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("missing required gateway config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged gateway configuration used by the running process.
///
/// Merge order: CLI > ENV > config file defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Root of the on-disk state tree (`<home>/.routecodex`).
    pub home: String,
    /// Per-provider-call deadline, seconds.
    pub request_timeout_secs: u64,
    /// Optional outbound proxy for upstream egress.
    pub proxy: Option<String>,
}

/// Optional layer used when merging gateway config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub home: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub proxy: Option<String>,
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.home.is_some() {
            self.home = other.home;
        }
        if other.request_timeout_secs.is_some() {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
    }

    pub fn into_config(self) -> Result<GatewayConfig, GatewayConfigError> {
        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: self.port.unwrap_or(5506),
            home: self.home.unwrap_or_else(home::resolve_home),
            request_timeout_secs: self.request_timeout_secs.unwrap_or(300),
            proxy: self.proxy,
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            home: Some(value.home),
            request_timeout_secs: Some(value.request_timeout_secs),
            proxy: value.proxy,
        }
    }
}

/// Time-ordered opaque id for one inbound request.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::now_v7().simple())
}
