//! Upstream edge: family profiles, rate-limit buckets, HTTP transport.
//!
//! This crate performs no routing decisions; it receives a fully
//! resolved target and executes one call against it.

pub mod error;
pub mod family;
pub mod headers;
pub mod ratelimit;
pub mod transport;

pub use error::{ProviderCallError, TransportErrorKind, UpstreamFailure, parse_upstream_error};
pub use family::{
    BodyInput, DeepseekProfile, EndpointInput, FamilyIdentity, FamilyProfile,
    FamilyProfileRegistry, GlmProfile, HeadersInput, IflowProfile, LmstudioProfile, ProfileChain,
    StreamHeadersInput, StreamMode, UserAgentInput, coerce_assistant_content,
};
pub use headers::{HOP_HEADERS, Headers, header_get, header_remove, header_set, strip_hop_headers};
pub use ratelimit::{
    CooldownApplied, DEFAULT_SCHEDULE, RateLimitCooldownError, RateLimitManager, ThrottleDecision,
    parse_retry_after,
};
pub use transport::{
    AssembleError, AssembledRequest, CallSpec, DEFAULT_USER_AGENT, HttpTransport, ProviderPayload,
    TransportConfig, UpstreamExecutor, assemble, compose_base_url, compose_endpoint,
};

/// Stable per-(provider, credential) key used in rate-limit buckets.
/// Derived by hashing so credential aliases never leak into bucket keys
/// or metrics labels; the provider id stays readable for operators.
pub fn provider_key(provider_id: &str, credential_id: &str) -> String {
    let digest = blake3::hash(format!("{provider_id}.{credential_id}").as_bytes());
    let hex = digest.to_hex();
    format!("{provider_id}.{}", &hex.as_str()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_key_is_stable_and_alias_scoped() {
        let a = provider_key("qwen", "a");
        let b = provider_key("qwen", "b");
        assert_eq!(a, provider_key("qwen", "a"));
        assert_ne!(a, b);
        assert!(a.starts_with("qwen."));
        assert_eq!(a.len(), "qwen.".len() + 16);
    }
}
