//! Deserialized user-config interface.
//!
//! File parsing and schema validation happen outside this workspace; the
//! gateway receives these structs ready-made and treats them as
//! immutable for the process lifetime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use routecodex_protocol::Protocol;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutesConfig {
    /// Logical route name → ordered target strings
    /// (`<providerId>.<modelId>[.<credentialId>]`). Order is the failover
    /// order; the router never reorders.
    #[serde(default)]
    pub routes: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Route used when the request model is not a dot-form target and
    /// does not name a route. Defaults to `default`.
    #[serde(default)]
    pub default_route: Option<String>,
}

impl RoutesConfig {
    pub fn default_route(&self) -> &str {
        self.default_route.as_deref().unwrap_or("default")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Credential/token family: `qwen`, `glm`, `iflow`, `openai`, ...
    pub provider_type: String,
    /// Family-profile tag when it differs from the provider type.
    #[serde(default)]
    pub family: Option<String>,
    /// Dialect spoken upstream; defaults to OpenAI Chat.
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Operator override, consulted before `base_url`.
    #[serde(default)]
    pub base_url_override: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub auth_prefix: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub oauth_provider_id: Option<String>,
}

impl ProviderEntry {
    pub fn protocol(&self) -> Protocol {
        self.protocol.unwrap_or(Protocol::OpenAIChat)
    }
}

/// Built-in base URLs for the known provider families.
pub fn static_base_url(provider_type: &str) -> Option<&'static str> {
    match provider_type {
        "openai" => Some("https://api.openai.com/v1"),
        "qwen" => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
        "glm" => Some("https://open.bigmodel.cn/api/paas/v4"),
        "iflow" => Some("https://apis.iflow.cn/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "modelscope" => Some("https://api-inference.modelscope.cn/v1"),
        "lmstudio" => Some("http://127.0.0.1:1234/v1"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let config: RoutesConfig = serde_json::from_value(serde_json::json!({
            "routes": {"default": ["qwen.qwen-max", "glm.glm-4.6.backup"]},
            "providers": {
                "qwen": {"provider_type": "qwen"},
                "glm": {"provider_type": "glm", "base_url": "https://open.bigmodel.cn/api/paas/v4"}
            }
        }))
        .unwrap();
        assert_eq!(config.default_route(), "default");
        assert_eq!(config.routes["default"].len(), 2);
        assert_eq!(config.providers["qwen"].protocol(), Protocol::OpenAIChat);
    }
}
