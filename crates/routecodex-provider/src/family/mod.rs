//! Provider family profiles: small sets of pure hooks that adapt the
//! endpoint, headers, body, and user-agent for one upstream family
//! without touching the pipeline.
//!
//! Every hook returns `Option`: `None` means "no opinion". Profiles are
//! resolved into an ordered chain; along each hook chain the first
//! `Some` wins.

mod deepseek;
mod glm;
mod iflow;
mod lmstudio;

pub use deepseek::DeepseekProfile;
pub use glm::{GlmProfile, coerce_assistant_content};
pub use iflow::IflowProfile;
pub use lmstudio::LmstudioProfile;

use std::sync::Arc;

use serde_json::Value;

use crate::headers::Headers;

/// Identity tuple used for profile selection.
#[derive(Debug, Clone, Default)]
pub struct FamilyIdentity {
    pub provider_family: Option<String>,
    pub provider_id: String,
    pub provider_key: String,
    pub provider_type: String,
    pub oauth_provider_id: Option<String>,
}

impl FamilyIdentity {
    fn matches(&self, family: &str) -> bool {
        self.provider_family.as_deref() == Some(family)
            || self.provider_type == family
            || self.provider_id == family
            || self.oauth_provider_id.as_deref() == Some(family)
    }
}

pub struct EndpointInput<'a> {
    pub request: &'a Value,
    pub provider_type: &'a str,
    pub runtime_endpoint: Option<&'a str>,
}

pub struct UserAgentInput<'a> {
    pub inbound_user_agent: Option<&'a str>,
    pub ua_from_config: Option<&'a str>,
    pub ua_from_service: Option<&'a str>,
    pub default_user_agent: &'a str,
}

pub struct BodyInput<'a> {
    pub default_body: &'a Value,
    pub request: &'a Value,
}

pub struct HeadersInput<'a> {
    pub headers: &'a Headers,
    pub request: &'a Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Buffered,
    Streaming,
}

pub struct StreamHeadersInput<'a> {
    pub headers: &'a Headers,
    pub mode: StreamMode,
}

pub trait FamilyProfile: Send + Sync {
    fn id(&self) -> &'static str;

    /// The family tag this profile matches against the identity tuple.
    fn family(&self) -> &'static str;

    fn resolve_endpoint(&self, _input: &EndpointInput<'_>) -> Option<String> {
        None
    }

    fn resolve_user_agent(&self, _input: &UserAgentInput<'_>) -> Option<String> {
        None
    }

    fn build_request_body(&self, _input: &BodyInput<'_>) -> Option<Value> {
        None
    }

    fn apply_request_headers(&self, _input: &HeadersInput<'_>) -> Option<Headers> {
        None
    }

    fn apply_stream_mode_headers(&self, _input: &StreamHeadersInput<'_>) -> Option<Headers> {
        None
    }
}

/// Populated once at startup, read-only afterwards.
#[derive(Default, Clone)]
pub struct FamilyProfileRegistry {
    profiles: Vec<Arc<dyn FamilyProfile>>,
}

impl FamilyProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(IflowProfile));
        registry.register(Arc::new(GlmProfile));
        registry.register(Arc::new(DeepseekProfile));
        registry.register(Arc::new(LmstudioProfile));
        registry
    }

    pub fn register(&mut self, profile: Arc<dyn FamilyProfile>) {
        self.profiles.push(profile);
    }

    /// Profiles matching the identity, in registration order.
    pub fn chain(&self, identity: &FamilyIdentity) -> ProfileChain {
        ProfileChain {
            profiles: self
                .profiles
                .iter()
                .filter(|profile| identity.matches(profile.family()))
                .cloned()
                .collect(),
        }
    }
}

/// First-`Some`-wins composition over the matched profiles.
#[derive(Default, Clone)]
pub struct ProfileChain {
    profiles: Vec<Arc<dyn FamilyProfile>>,
}

impl ProfileChain {
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn resolve_endpoint(&self, input: &EndpointInput<'_>) -> Option<String> {
        self.profiles
            .iter()
            .find_map(|profile| profile.resolve_endpoint(input))
    }

    pub fn resolve_user_agent(&self, input: &UserAgentInput<'_>) -> Option<String> {
        self.profiles
            .iter()
            .find_map(|profile| profile.resolve_user_agent(input))
    }

    pub fn build_request_body(&self, input: &BodyInput<'_>) -> Option<Value> {
        self.profiles
            .iter()
            .find_map(|profile| profile.build_request_body(input))
    }

    pub fn apply_request_headers(&self, input: &HeadersInput<'_>) -> Option<Headers> {
        self.profiles
            .iter()
            .find_map(|profile| profile.apply_request_headers(input))
    }

    pub fn apply_stream_mode_headers(&self, input: &StreamHeadersInput<'_>) -> Option<Headers> {
        self.profiles
            .iter()
            .find_map(|profile| profile.apply_stream_mode_headers(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(provider_type: &str) -> FamilyIdentity {
        FamilyIdentity {
            provider_type: provider_type.to_string(),
            provider_id: provider_type.to_string(),
            provider_key: format!("{provider_type}.default"),
            ..Default::default()
        }
    }

    #[test]
    fn chain_matches_by_type_and_family_tag() {
        let registry = FamilyProfileRegistry::with_builtins();
        assert!(!registry.chain(&identity("iflow")).is_empty());
        assert!(!registry.chain(&identity("glm")).is_empty());
        assert!(registry.chain(&identity("openai")).is_empty());

        let tagged = FamilyIdentity {
            provider_family: Some("deepseek".to_string()),
            provider_id: "my-deepseek".to_string(),
            provider_type: "openai".to_string(),
            ..Default::default()
        };
        assert!(!registry.chain(&tagged).is_empty());
    }

    #[test]
    fn first_some_wins_along_the_chain() {
        struct A;
        impl FamilyProfile for A {
            fn id(&self) -> &'static str {
                "a"
            }
            fn family(&self) -> &'static str {
                "x"
            }
            fn resolve_user_agent(&self, _input: &UserAgentInput<'_>) -> Option<String> {
                Some("ua-a".to_string())
            }
        }
        struct B;
        impl FamilyProfile for B {
            fn id(&self) -> &'static str {
                "b"
            }
            fn family(&self) -> &'static str {
                "x"
            }
            fn resolve_user_agent(&self, _input: &UserAgentInput<'_>) -> Option<String> {
                Some("ua-b".to_string())
            }
        }

        let mut registry = FamilyProfileRegistry::new();
        registry.register(Arc::new(A));
        registry.register(Arc::new(B));
        let chain = registry.chain(&identity("x"));
        let input = UserAgentInput {
            inbound_user_agent: None,
            ua_from_config: None,
            ua_from_service: None,
            default_user_agent: "routecodex",
        };
        assert_eq!(chain.resolve_user_agent(&input), Some("ua-a".to_string()));
    }
}
