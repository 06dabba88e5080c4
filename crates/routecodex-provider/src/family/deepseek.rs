use serde_json::Value;

use routecodex_common::env::{self, DeepseekHeaderMode};

use super::{FamilyProfile, HeadersInput, StreamHeadersInput, StreamMode};
use crate::headers::{Headers, header_remove, header_set};

/// Headers DeepSeek's gateway rejects or mangles.
const STRIPPED_HEADERS: &[&str] = &[
    "x-goog-api-client",
    "client-metadata",
    "accept-encoding",
    "originator",
];

pub struct DeepseekProfile;

fn has_image_attachment(request: &Value) -> bool {
    request
        .get("metadata")
        .and_then(|metadata| metadata.get("hasImageAttachment"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl FamilyProfile for DeepseekProfile {
    fn id(&self) -> &'static str {
        "deepseek"
    }

    fn family(&self) -> &'static str {
        "deepseek"
    }

    fn apply_request_headers(&self, input: &HeadersInput<'_>) -> Option<Headers> {
        let mut headers = input.headers.clone();
        for name in STRIPPED_HEADERS {
            header_remove(&mut headers, name);
        }
        if env::deepseek_header_mode() == DeepseekHeaderMode::Minimal {
            header_set(
                &mut headers,
                "requestId",
                uuid::Uuid::new_v4().to_string(),
            );
            let request_type = if has_image_attachment(input.request) {
                "image_gen"
            } else {
                "agent"
            };
            header_set(&mut headers, "requestType", request_type);
        }
        Some(headers)
    }

    fn apply_stream_mode_headers(&self, input: &StreamHeadersInput<'_>) -> Option<Headers> {
        if input.mode != StreamMode::Streaming
            || env::deepseek_header_mode() != DeepseekHeaderMode::Minimal
        {
            return None;
        }
        let mut headers = input.headers.clone();
        header_set(&mut headers, "Accept", "*/*");
        Some(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::header_get;

    #[test]
    fn strips_google_client_headers() {
        let profile = DeepseekProfile;
        let headers: Headers = vec![
            ("x-goog-api-client".to_string(), "gl-node".to_string()),
            ("Accept-Encoding".to_string(), "gzip".to_string()),
            ("Authorization".to_string(), "Bearer x".to_string()),
        ];
        let request = serde_json::json!({});
        let out = profile
            .apply_request_headers(&HeadersInput {
                headers: &headers,
                request: &request,
            })
            .unwrap();
        assert!(header_get(&out, "x-goog-api-client").is_none());
        assert!(header_get(&out, "accept-encoding").is_none());
        assert_eq!(header_get(&out, "authorization"), Some("Bearer x"));
    }

    #[test]
    fn minimal_mode_adds_request_id_and_type() {
        unsafe { std::env::set_var("ROUTECODEX_DEEPSEEK_HEADER_MODE", "minimal") };
        let profile = DeepseekProfile;
        let headers: Headers = Vec::new();

        let plain = serde_json::json!({});
        let out = profile
            .apply_request_headers(&HeadersInput {
                headers: &headers,
                request: &plain,
            })
            .unwrap();
        assert!(header_get(&out, "requestId").is_some());
        assert_eq!(header_get(&out, "requestType"), Some("agent"));

        let with_image = serde_json::json!({"metadata": {"hasImageAttachment": true}});
        let out = profile
            .apply_request_headers(&HeadersInput {
                headers: &headers,
                request: &with_image,
            })
            .unwrap();
        assert_eq!(header_get(&out, "requestType"), Some("image_gen"));

        let stream = profile
            .apply_stream_mode_headers(&StreamHeadersInput {
                headers: &headers,
                mode: StreamMode::Streaming,
            })
            .unwrap();
        assert_eq!(header_get(&stream, "accept"), Some("*/*"));
        unsafe { std::env::remove_var("ROUTECODEX_DEEPSEEK_HEADER_MODE") };
    }
}
