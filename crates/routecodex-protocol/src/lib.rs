//! Wire types for the three supported dialects.
//!
//! Every top-level object carries a flattened `extra` map so fields this
//! gateway does not model survive a round trip untouched.

pub mod anthropic;
pub mod openai;
pub mod sse;

use serde::{Deserialize, Serialize};

/// The dialect spoken on a wire segment (inbound entry or upstream call).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "openai-chat")]
    OpenAIChat,
    #[serde(rename = "openai-responses")]
    OpenAIResponses,
    #[serde(rename = "anthropic-messages")]
    AnthropicMessages,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::OpenAIChat => "openai-chat",
            Protocol::OpenAIResponses => "openai-responses",
            Protocol::AnthropicMessages => "anthropic-messages",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai-chat" => Some(Protocol::OpenAIChat),
            "openai-responses" => Some(Protocol::OpenAIResponses),
            "anthropic-messages" => Some(Protocol::AnthropicMessages),
            _ => None,
        }
    }
}

/// The HTTP path a client calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryEndpoint {
    #[serde(rename = "/v1/chat/completions")]
    ChatCompletions,
    #[serde(rename = "/v1/responses")]
    Responses,
    #[serde(rename = "/v1/messages")]
    Messages,
}

impl EntryEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            EntryEndpoint::ChatCompletions => "/v1/chat/completions",
            EntryEndpoint::Responses => "/v1/responses",
            EntryEndpoint::Messages => "/v1/messages",
        }
    }

    /// The dialect a client at this endpoint speaks.
    pub fn protocol(&self) -> Protocol {
        match self {
            EntryEndpoint::ChatCompletions => Protocol::OpenAIChat,
            EntryEndpoint::Responses => Protocol::OpenAIResponses,
            EntryEndpoint::Messages => Protocol::AnthropicMessages,
        }
    }
}
