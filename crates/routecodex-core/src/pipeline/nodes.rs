//! Built-in node implementations and the default registry wiring.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use routecodex_codec::{Codec, CodecContext, CodecRegistry};
use routecodex_provider::ProviderPayload;

use super::blueprint::{NodeDescriptor, Phase};
use super::context::{PipelineContext, StreamHandle};
use super::node::{NodeError, NodeRegistry, PipelineNode};
use crate::compat::{CompatRegistry, CompatibilityContext, Direction};
use crate::router::VirtualRouter;

/// Context key holding the raw inbound payload before the input node
/// claims it.
pub const EXTRA_INBOUND: &str = "inbound";
/// Raw provider payload as received, before response-phase transforms.
pub const EXTRA_PROVIDER_PAYLOAD: &str = "providerPayload";
/// Provider type of the target that actually served the request.
pub const EXTRA_PROVIDER_TYPE: &str = "providerType";

// ---- input ----

struct InputNode {
    id: String,
}

#[async_trait]
impl PipelineNode for InputNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), NodeError> {
        if ctx.metadata.request_id.is_empty() {
            return Err("request id must be non-empty".into());
        }
        let Some(inbound) = ctx.extra.remove(EXTRA_INBOUND) else {
            return Err("no inbound payload attached to context".into());
        };
        ctx.request = Some(inbound);
        Ok(())
    }
}

// ---- process (llmswitch) ----

struct LlmSwitchNode {
    id: String,
    codec: Arc<dyn Codec>,
}

impl LlmSwitchNode {
    fn codec_ctx(ctx: &PipelineContext) -> CodecContext {
        CodecContext {
            request_id: ctx.metadata.request_id.clone(),
            entry_endpoint: ctx.metadata.entry_endpoint.clone(),
        }
    }
}

#[async_trait]
impl PipelineNode for LlmSwitchNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), NodeError> {
        match ctx.phase {
            Phase::Request => {
                let Some(request) = ctx.request.take() else {
                    return Err("llmswitch ran before input".into());
                };
                ctx.request = Some(self.codec.convert_request(request, &Self::codec_ctx(ctx))?);
            }
            Phase::Response => {
                let Some(response) = ctx.response.take() else {
                    return Err("llmswitch ran without a response".into());
                };
                ctx.response = Some(self.codec.convert_response(response, &Self::codec_ctx(ctx))?);
            }
        }
        Ok(())
    }
}

// ---- compatibility ----

struct CompatibilityNode {
    id: String,
    registry: Arc<CompatRegistry>,
    explicit_kind: Option<String>,
}

impl CompatibilityNode {
    fn provider_type(ctx: &PipelineContext) -> String {
        ctx.extra_str(EXTRA_PROVIDER_TYPE)
            .map(str::to_string)
            .or_else(|| {
                ctx.route.as_ref().and_then(|route| {
                    route
                        .targets
                        .first()
                        .map(|target| target.provider_id.clone())
                })
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl PipelineNode for CompatibilityNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), NodeError> {
        let provider_type = Self::provider_type(ctx);
        let module = match &self.explicit_kind {
            Some(kind) => self.registry.resolve(kind)?,
            None => self.registry.for_provider(&provider_type),
        };

        let direction = match ctx.phase {
            Phase::Request => Direction::Incoming,
            Phase::Response => Direction::Outgoing,
        };
        let compat_ctx = CompatibilityContext {
            compatibility_id: module.id().to_string(),
            profile_id: None,
            provider_type,
            direction,
            stage: format!("compatibility:{}", self.id),
            request_id: ctx.metadata.request_id.clone(),
            entry_endpoint: ctx.metadata.entry_endpoint.clone(),
            metadata: Value::Null,
        };

        match ctx.phase {
            Phase::Request => {
                let Some(request) = ctx.request.take() else {
                    return Err("compatibility ran before input".into());
                };
                ctx.request = Some(module.process_incoming(request, &compat_ctx)?);
            }
            Phase::Response => {
                let Some(response) = ctx.response.take() else {
                    return Err("compatibility ran without a response".into());
                };
                ctx.response = Some(module.process_outgoing(response, &compat_ctx)?);
            }
        }
        Ok(())
    }
}

// ---- provider ----

struct ProviderNode {
    id: String,
    router: Arc<VirtualRouter>,
}

#[async_trait]
impl PipelineNode for ProviderNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), NodeError> {
        if ctx.phase == Phase::Response {
            ctx.warn("provider executed during response phase");
            return Ok(());
        }

        let Some(selection) = ctx.route.clone() else {
            return Err("provider node requires a route selection".into());
        };
        let Some(scope) = ctx.scope.clone() else {
            return Err("provider node requires a request scope".into());
        };
        let Some(request) = ctx.request.clone() else {
            return Err("provider node ran before input".into());
        };

        let success = self
            .router
            .dispatch(&selection, &request, ctx.stream_upstream, &scope)
            .await?;

        ctx.extra.insert(
            EXTRA_PROVIDER_TYPE.to_string(),
            Value::String(success.provider_type.clone()),
        );
        match success.payload {
            ProviderPayload::Json {
                headers, body, ..
            } => {
                ctx.extra
                    .insert(EXTRA_PROVIDER_PAYLOAD.to_string(), body.clone());
                ctx.response = Some(body);
                ctx.response_headers = headers;
            }
            ProviderPayload::Stream {
                status,
                headers,
                rx,
            } => {
                ctx.upstream_stream = Some(StreamHandle {
                    status,
                    headers,
                    rx,
                });
            }
        }
        Ok(())
    }
}

// ---- output ----

struct OutputNode {
    id: String,
}

#[async_trait]
impl PipelineNode for OutputNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), NodeError> {
        if ctx.response.is_none() && ctx.upstream_stream.is_none() {
            return Err("pipeline finished without a response".into());
        }
        routecodex_provider::strip_hop_headers(&mut ctx.response_headers);
        Ok(())
    }
}

// ---- sse markers ----

struct SseInputNode {
    id: String,
}

#[async_trait]
impl PipelineNode for SseInputNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), NodeError> {
        if !ctx.stream_requested {
            ctx.warn("sse-input on a non-streaming request");
        }
        Ok(())
    }
}

struct SseOutputNode {
    id: String,
}

#[async_trait]
impl PipelineNode for SseOutputNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), NodeError> {
        if ctx.upstream_stream.is_none() && ctx.response.is_none() {
            return Err("sse-output has nothing to emit".into());
        }
        Ok(())
    }
}

/// Registry with every built-in node implementation.
pub fn default_node_registry(
    codecs: Arc<CodecRegistry>,
    compat: Arc<CompatRegistry>,
    router: Arc<VirtualRouter>,
) -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register(
        "openai-input",
        Arc::new(|descriptor: &NodeDescriptor| {
            Ok(Arc::new(InputNode {
                id: descriptor.id.clone(),
            }) as Arc<dyn PipelineNode>)
        }),
    );

    let codecs_for_switch = codecs.clone();
    registry.register(
        "llmswitch",
        Arc::new(move |descriptor: &NodeDescriptor| {
            let codec_id = descriptor
                .options
                .get("codec")
                .and_then(Value::as_str)
                .ok_or("llmswitch requires a codec option")?;
            let codec = codecs_for_switch.get(codec_id)?;
            Ok(Arc::new(LlmSwitchNode {
                id: descriptor.id.clone(),
                codec,
            }) as Arc<dyn PipelineNode>)
        }),
    );

    let compat_for_node = compat.clone();
    registry.register(
        "compatibility",
        Arc::new(move |descriptor: &NodeDescriptor| {
            let explicit_kind = descriptor
                .options
                .get("module")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(kind) = &explicit_kind {
                // Unknown kinds must fail at construction, not mid-request.
                compat_for_node.resolve(kind)?;
            }
            Ok(Arc::new(CompatibilityNode {
                id: descriptor.id.clone(),
                registry: compat_for_node.clone(),
                explicit_kind,
            }) as Arc<dyn PipelineNode>)
        }),
    );

    let router_for_node = router.clone();
    registry.register(
        "provider-http",
        Arc::new(move |descriptor: &NodeDescriptor| {
            Ok(Arc::new(ProviderNode {
                id: descriptor.id.clone(),
                router: router_for_node.clone(),
            }) as Arc<dyn PipelineNode>)
        }),
    );

    registry.register(
        "openai-output",
        Arc::new(|descriptor: &NodeDescriptor| {
            Ok(Arc::new(OutputNode {
                id: descriptor.id.clone(),
            }) as Arc<dyn PipelineNode>)
        }),
    );

    registry.register(
        "sse-input",
        Arc::new(|descriptor: &NodeDescriptor| {
            Ok(Arc::new(SseInputNode {
                id: descriptor.id.clone(),
            }) as Arc<dyn PipelineNode>)
        }),
    );

    registry.register(
        "sse-output",
        Arc::new(|descriptor: &NodeDescriptor| {
            Ok(Arc::new(SseOutputNode {
                id: descriptor.id.clone(),
            }) as Arc<dyn PipelineNode>)
        }),
    );

    registry
}
