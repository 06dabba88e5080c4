use serde_json::Value;

use crate::convert::responses::{chat_request_to_responses, responses_response_to_chat};
use crate::{Codec, CodecContext, CodecError, decode, encode};

/// Bridges a Chat Completions entry onto an OpenAI Responses upstream.
pub struct ChatResponsesCodec;

impl Codec for ChatResponsesCodec {
    fn id(&self) -> &'static str {
        "chat-responses"
    }

    fn convert_request(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        let request = decode("openai-chat", payload)?;
        Ok(encode(&chat_request_to_responses(request)))
    }

    fn convert_response(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        let response = decode("openai-responses", payload)?;
        Ok(encode(&responses_response_to_chat(response)))
    }
}
