use serde_json::Value;

use crate::convert::anthropic::{chat_request_to_messages, messages_response_to_chat};
use crate::{Codec, CodecContext, CodecError, decode, encode};

/// Bridges a Chat Completions entry onto an Anthropic Messages upstream.
pub struct ChatAnthropicCodec;

impl Codec for ChatAnthropicCodec {
    fn id(&self) -> &'static str {
        "chat-anthropic"
    }

    fn convert_request(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        let request = decode("openai-chat", payload)?;
        Ok(encode(&chat_request_to_messages(request)))
    }

    fn convert_response(&self, payload: Value, _ctx: &CodecContext) -> Result<Value, CodecError> {
        let response = decode("anthropic-messages", payload)?;
        Ok(encode(&messages_response_to_chat(response)))
    }
}
