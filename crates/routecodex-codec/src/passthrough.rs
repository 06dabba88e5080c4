use serde_json::Value;

use crate::{Codec, CodecContext, CodecError};

/// Identity codec for pipelines whose entry and provider dialects match.
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {
    fn id(&self) -> &'static str {
        "passthrough"
    }

    fn convert_request(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        Ok(payload)
    }

    fn convert_response(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_both_directions() {
        let ctx = CodecContext {
            request_id: "req_test".to_string(),
            entry_endpoint: "/v1/chat/completions".to_string(),
        };
        let payload = serde_json::json!({"model": "m", "messages": []});
        let codec = PassthroughCodec;
        assert_eq!(codec.convert_request(payload.clone(), &ctx).unwrap(), payload);
        assert_eq!(codec.convert_response(payload.clone(), &ctx).unwrap(), payload);
    }
}
