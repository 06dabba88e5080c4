use serde_json::Value;

use crate::convert::anthropic::{chat_response_to_messages, messages_request_to_chat};
use crate::{Codec, CodecContext, CodecError, decode, encode};

/// Bridges an Anthropic Messages entry onto an OpenAI Chat upstream.
pub struct AnthropicOpenAICodec;

impl Codec for AnthropicOpenAICodec {
    fn id(&self) -> &'static str {
        "anthropic-openai"
    }

    fn convert_request(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        let request = decode("anthropic-messages", payload)?;
        Ok(encode(&messages_request_to_chat(request)))
    }

    fn convert_response(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        let response = decode("openai-chat", payload)?;
        Ok(encode(&chat_response_to_messages(response)))
    }
}
