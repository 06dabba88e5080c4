use serde_json::Value;

use super::{BodyInput, EndpointInput, FamilyProfile, UserAgentInput};

const WEB_SEARCH_ENDPOINT: &str = "/chat/retrieve";
const IFLOW_USER_AGENT: &str = "iflow-cli/2.0";

/// iFlow routes web-search traffic to a dedicated retrieval endpoint and
/// wraps the actual payload under `data`.
pub struct IflowProfile;

fn web_search_requested(request: &Value) -> bool {
    request
        .get("metadata")
        .and_then(|metadata| metadata.get("iflowWebSearch"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl FamilyProfile for IflowProfile {
    fn id(&self) -> &'static str {
        "iflow"
    }

    fn family(&self) -> &'static str {
        "iflow"
    }

    fn resolve_endpoint(&self, input: &EndpointInput<'_>) -> Option<String> {
        if !web_search_requested(input.request) {
            return None;
        }
        let from_metadata = input
            .request
            .get("metadata")
            .and_then(|metadata| metadata.get("entryEndpoint"))
            .and_then(Value::as_str)
            .filter(|endpoint| !endpoint.is_empty());
        Some(
            from_metadata
                .unwrap_or(WEB_SEARCH_ENDPOINT)
                .to_string(),
        )
    }

    fn build_request_body(&self, input: &BodyInput<'_>) -> Option<Value> {
        if !web_search_requested(input.request) {
            return None;
        }
        input.request.get("data").cloned()
    }

    fn resolve_user_agent(&self, input: &UserAgentInput<'_>) -> Option<String> {
        Some(
            input
                .ua_from_config
                .or(input.ua_from_service)
                .unwrap_or(IFLOW_USER_AGENT)
                .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_search_rewrites_endpoint_and_body() {
        let profile = IflowProfile;
        let request = serde_json::json!({
            "metadata": {"iflowWebSearch": true},
            "data": {"query": "rust"}
        });
        let endpoint = profile.resolve_endpoint(&EndpointInput {
            request: &request,
            provider_type: "iflow",
            runtime_endpoint: None,
        });
        assert_eq!(endpoint.as_deref(), Some("/chat/retrieve"));

        let body = profile.build_request_body(&BodyInput {
            default_body: &serde_json::json!({}),
            request: &request,
        });
        assert_eq!(body, Some(serde_json::json!({"query": "rust"})));
    }

    #[test]
    fn metadata_entry_endpoint_overrides_default() {
        let profile = IflowProfile;
        let request = serde_json::json!({
            "metadata": {"iflowWebSearch": true, "entryEndpoint": "/chat/search"}
        });
        let endpoint = profile.resolve_endpoint(&EndpointInput {
            request: &request,
            provider_type: "iflow",
            runtime_endpoint: None,
        });
        assert_eq!(endpoint.as_deref(), Some("/chat/search"));
    }

    #[test]
    fn ordinary_requests_are_untouched() {
        let profile = IflowProfile;
        let request = serde_json::json!({"model": "m"});
        assert!(profile
            .resolve_endpoint(&EndpointInput {
                request: &request,
                provider_type: "iflow",
                runtime_endpoint: None,
            })
            .is_none());
    }
}
