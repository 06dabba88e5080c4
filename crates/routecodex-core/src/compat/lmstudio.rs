use serde_json::Value;

use super::{CompatError, CompatibilityContext, CompatibilityModule};

/// LM Studio's local server rejects several cloud-only request fields
/// and sometimes omits response envelope fields.
pub struct LmstudioCompatibility;

const UNSUPPORTED_REQUEST_FIELDS: &[&str] = &["metadata", "stream_options", "store", "user"];

impl CompatibilityModule for LmstudioCompatibility {
    fn id(&self) -> &'static str {
        "lmstudio"
    }

    fn kind(&self) -> &'static str {
        "lmstudio-compatibility"
    }

    fn provider_type(&self) -> Option<&'static str> {
        Some("lmstudio")
    }

    fn process_incoming(
        &self,
        mut payload: Value,
        _ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError> {
        if let Some(object) = payload.as_object_mut() {
            for field in UNSUPPORTED_REQUEST_FIELDS {
                object.remove(*field);
            }
        }
        Ok(payload)
    }

    fn process_outgoing(
        &self,
        mut payload: Value,
        _ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError> {
        if let Some(object) = payload.as_object_mut() {
            if !object.contains_key("object") {
                object.insert(
                    "object".to_string(),
                    Value::String("chat.completion".to_string()),
                );
            }
            if !object.contains_key("id") {
                object.insert("id".to_string(), Value::String("chatcmpl-local".to_string()));
            }
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::Direction;
    use crate::compat::tests::test_ctx;

    #[test]
    fn strips_cloud_only_fields() {
        let module = LmstudioCompatibility;
        let payload = serde_json::json!({
            "model": "local",
            "metadata": {"x": 1},
            "stream_options": {"include_usage": true},
            "messages": []
        });
        let out = module
            .process_incoming(payload, &test_ctx(Direction::Incoming))
            .unwrap();
        assert!(out.get("metadata").is_none());
        assert!(out.get("stream_options").is_none());
        assert!(out.get("messages").is_some());
    }

    #[test]
    fn fills_missing_response_envelope() {
        let module = LmstudioCompatibility;
        let out = module
            .process_outgoing(
                serde_json::json!({"choices": []}),
                &test_ctx(Direction::Outgoing),
            )
            .unwrap();
        assert_eq!(out["object"], "chat.completion");
        assert_eq!(out["id"], "chatcmpl-local");
    }
}
