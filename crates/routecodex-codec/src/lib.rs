//! Protocol-switch codecs.
//!
//! A codec converts a request payload from the entry dialect into the
//! provider dialect, and the provider's response payload back. Codecs are
//! looked up by id from a [`CodecRegistry`] that is populated at startup
//! and frozen before traffic is served.

pub mod convert;

mod anthropic_openai;
mod chat_anthropic;
mod chat_responses;
mod passthrough;
mod responses_openai;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub use anthropic_openai::AnthropicOpenAICodec;
pub use chat_anthropic::ChatAnthropicCodec;
pub use chat_responses::ChatResponsesCodec;
pub use passthrough::PassthroughCodec;
pub use responses_openai::ResponsesOpenAICodec;

#[derive(Debug, Clone)]
pub struct CodecContext {
    pub request_id: String,
    pub entry_endpoint: String,
}

#[derive(Debug, Clone)]
pub enum CodecError {
    /// Payload did not deserialize into the expected dialect shape.
    Decode { dialect: &'static str, message: String },
    DuplicateCodec(String),
    UnknownCodec(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Decode { dialect, message } => {
                write!(f, "failed to decode {dialect} payload: {message}")
            }
            CodecError::DuplicateCodec(id) => write!(f, "codec already registered: {id}"),
            CodecError::UnknownCodec(id) => write!(f, "unknown codec: {id}"),
        }
    }
}

impl std::error::Error for CodecError {}

pub trait Codec: Send + Sync {
    fn id(&self) -> &'static str;

    /// One-time setup hook; the registry guarantees a single invocation.
    fn initialize(&self) {}

    fn convert_request(&self, payload: Value, ctx: &CodecContext) -> Result<Value, CodecError>;

    fn convert_response(&self, payload: Value, ctx: &CodecContext) -> Result<Value, CodecError>;
}

/// Startup-populated codec table. Registration is the only mutation path;
/// serving code only reads.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, codec: Arc<dyn Codec>) -> Result<(), CodecError> {
        let id = codec.id();
        if self.codecs.contains_key(id) {
            return Err(CodecError::DuplicateCodec(id.to_string()));
        }
        codec.initialize();
        self.codecs.insert(id, codec);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Codec>, CodecError> {
        self.codecs
            .get(id)
            .cloned()
            .ok_or_else(|| CodecError::UnknownCodec(id.to_string()))
    }

    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.codecs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Registry with every built-in codec.
pub fn default_registry() -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    for codec in [
        Arc::new(PassthroughCodec) as Arc<dyn Codec>,
        Arc::new(ResponsesOpenAICodec),
        Arc::new(AnthropicOpenAICodec),
        Arc::new(ChatAnthropicCodec),
        Arc::new(ChatResponsesCodec),
    ] {
        registry
            .register(codec)
            .expect("built-in codec ids are unique");
    }
    registry
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    dialect: &'static str,
    payload: Value,
) -> Result<T, CodecError> {
    serde_json::from_value(payload).map_err(|err| CodecError::Decode {
        dialect,
        message: err.to_string(),
    })
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_builtins() {
        let registry = default_registry();
        assert_eq!(
            registry.ids(),
            vec![
                "anthropic-openai",
                "chat-anthropic",
                "chat-responses",
                "passthrough",
                "responses-openai"
            ]
        );
        assert!(registry.get("responses-openai").is_ok());
        assert!(matches!(
            registry.get("no-such-codec"),
            Err(CodecError::UnknownCodec(_))
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = CodecRegistry::new();
        registry.register(Arc::new(PassthroughCodec)).unwrap();
        assert!(matches!(
            registry.register(Arc::new(PassthroughCodec)),
            Err(CodecError::DuplicateCodec(_))
        ));
    }
}
