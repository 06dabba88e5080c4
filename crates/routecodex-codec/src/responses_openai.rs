use serde_json::Value;

use crate::convert::responses::{chat_response_to_responses, responses_request_to_chat};
use crate::{Codec, CodecContext, CodecError, decode, encode};

/// Bridges a Responses entry onto an OpenAI Chat upstream.
pub struct ResponsesOpenAICodec;

impl Codec for ResponsesOpenAICodec {
    fn id(&self) -> &'static str {
        "responses-openai"
    }

    fn convert_request(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        let request = decode("openai-responses", payload)?;
        Ok(encode(&responses_request_to_chat(request)))
    }

    fn convert_response(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        let response = decode("openai-chat", payload)?;
        Ok(encode(&chat_response_to_responses(response)))
    }
}
