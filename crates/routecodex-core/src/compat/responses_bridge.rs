use std::sync::Arc;

use serde_json::Value;

use routecodex_codec::{CodecContext, CodecRegistry};

use super::{CompatError, CompatibilityContext, CompatibilityModule};

/// Bridges the OpenAI Responses dialect onto Chat via the configured
/// codec; used when a pipeline wants the bridge as a compatibility step
/// rather than a process node. Shape-detects so repeated invocation is
/// a no-op.
pub struct ResponsesBridgeCompatibility {
    codecs: Arc<CodecRegistry>,
}

impl ResponsesBridgeCompatibility {
    pub fn new(codecs: Arc<CodecRegistry>) -> Self {
        Self { codecs }
    }

    fn codec_ctx(ctx: &CompatibilityContext) -> CodecContext {
        CodecContext {
            request_id: ctx.request_id.clone(),
            entry_endpoint: ctx.entry_endpoint.clone(),
        }
    }
}

impl CompatibilityModule for ResponsesBridgeCompatibility {
    fn id(&self) -> &'static str {
        "responses-c4m"
    }

    fn kind(&self) -> &'static str {
        "responses:c4m"
    }

    fn process_incoming(
        &self,
        payload: Value,
        ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError> {
        // Already chat-shaped: nothing to do.
        if payload.get("messages").is_some() {
            return Ok(payload);
        }
        let codec = self.codecs.get("responses-openai")?;
        Ok(codec.convert_request(payload, &Self::codec_ctx(ctx))?)
    }

    fn process_outgoing(
        &self,
        payload: Value,
        ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError> {
        // Already responses-shaped: nothing to do.
        if payload.get("output").is_some() {
            return Ok(payload);
        }
        let codec = self.codecs.get("responses-openai")?;
        Ok(codec.convert_response(payload, &Self::codec_ctx(ctx))?)
    }
}
