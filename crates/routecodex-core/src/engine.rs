//! The request-execution engine: resolve the blueprint pair for an
//! entry endpoint, run the request-phase pipeline (which dispatches
//! upstream through the virtual router), then the response-phase
//! pipeline, and hand the result to the HTTP layer.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use routecodex_codec::CodecRegistry;
use routecodex_protocol::{EntryEndpoint, Protocol};
use routecodex_provider::Headers;

use crate::compat::CompatRegistry;
use crate::error::{ErrorKind, GatewayError};
use crate::errorlog::{ErrorLog, ErrorLogEntry};
use crate::pipeline::blueprint::{Blueprint, BlueprintSet, Phase, ProcessMode};
use crate::pipeline::context::{PipelineMetadata, StreamHandle};
use crate::pipeline::nodes::{EXTRA_INBOUND, EXTRA_PROVIDER_TYPE, default_node_registry};
use crate::pipeline::orchestrator::Orchestrator;
use crate::router::{RequestScope, VirtualRouter};
use crate::snapshot::{SnapshotDialect, SnapshotWriter};

pub struct GatewayRequest {
    pub endpoint: EntryEndpoint,
    pub body: Value,
    pub stream: bool,
    pub request_id: String,
    pub inbound_user_agent: Option<String>,
}

#[derive(Debug)]
pub enum EngineOutcome {
    Buffered {
        body: Value,
        headers: Headers,
        /// The client asked for SSE; the HTTP layer synthesizes a chunk
        /// stream from `body`.
        synthesize_stream: bool,
    },
    /// Upstream SSE copied through verbatim.
    UpstreamStream {
        status: u16,
        headers: Headers,
        rx: mpsc::Receiver<Bytes>,
    },
}

pub struct Engine {
    blueprints: BlueprintSet,
    orchestrator: Orchestrator,
    router: Arc<VirtualRouter>,
    snapshots: Arc<SnapshotWriter>,
    errors: Arc<ErrorLog>,
}

impl Engine {
    pub fn new(
        blueprints: BlueprintSet,
        codecs: Arc<CodecRegistry>,
        compat: Arc<CompatRegistry>,
        router: Arc<VirtualRouter>,
        snapshots: Arc<SnapshotWriter>,
        errors: Arc<ErrorLog>,
    ) -> Self {
        let registry = default_node_registry(codecs, compat, router.clone());
        Self {
            blueprints,
            orchestrator: Orchestrator::new(registry),
            router,
            snapshots,
            errors,
        }
    }

    pub async fn handle(&self, request: GatewayRequest) -> Result<EngineOutcome, GatewayError> {
        let outcome = self.handle_inner(&request).await;
        if let Err(err) = &outcome {
            self.errors.record(ErrorLogEntry::from_gateway(err));
        }
        outcome
    }

    async fn handle_inner(&self, request: &GatewayRequest) -> Result<EngineOutcome, GatewayError> {
        let request_id = request.request_id.clone();
        let endpoint = request.endpoint;
        let dialect = snapshot_dialect(endpoint);

        let Some(model) = request.body.get("model").and_then(Value::as_str) else {
            let mut err = GatewayError::configuration("INVALID_REQUEST", "model is required");
            err.status = 400;
            return Err(err.with_request_id(request_id));
        };

        self.snapshots
            .write_entry(dialect, &request_id, "request", &request.body);

        let selection = self
            .router
            .plan(model)
            .map_err(|err| err.with_request_id(request_id.clone()))?;
        let provider_protocol = self.router.provider_protocol(&selection);
        let provider_type = self.router.provider_type(&selection);

        let scope = RequestScope {
            request_id: request_id.clone(),
            entry_endpoint: endpoint.path().to_string(),
            inbound_user_agent: request.inbound_user_agent.clone(),
        };

        // Upstream SSE is only copied through when the entry dialect is
        // the provider dialect; bridged streams are synthesized from a
        // buffered upstream response instead.
        let stream_upstream = request.stream && endpoint.protocol() == provider_protocol;

        let blueprint = self.resolve_blueprint(endpoint, Phase::Request, provider_protocol)?;
        let mut ctx = self.build_context(blueprint, Phase::Request, &request_id, endpoint);
        ctx.extra
            .insert(EXTRA_INBOUND.to_string(), request.body.clone());
        ctx.route = Some(selection);
        ctx.scope = Some(scope);
        ctx.stream_requested = request.stream;
        ctx.stream_upstream = stream_upstream;
        if let Some(provider_type) = provider_type {
            ctx.extra.insert(
                EXTRA_PROVIDER_TYPE.to_string(),
                Value::String(provider_type),
            );
        }

        if let Err(err) = self.orchestrator.execute(&mut ctx).await {
            return Err(err
                .into_gateway_error()
                .with_request_id(request_id.clone()));
        }

        if let Some(StreamHandle {
            status,
            mut headers,
            rx,
        }) = ctx.upstream_stream.take()
        {
            routecodex_provider::strip_hop_headers(&mut headers);
            debug!(event = "engine.passthrough_stream", request_id = %request_id);
            return Ok(EngineOutcome::UpstreamStream {
                status,
                headers,
                rx,
            });
        }

        let Some(provider_response) = ctx.response.take() else {
            return Err(GatewayError::new(
                ErrorKind::Pipeline,
                "PIPELINE_NO_RESPONSE",
                "request pipeline produced no response",
            )
            .with_request_id(request_id));
        };
        let response_headers = ctx.response_headers.clone();
        let provider_type = ctx
            .extra_str(EXTRA_PROVIDER_TYPE)
            .map(str::to_string);

        self.snapshots
            .write_stage(&request_id, "provider-response", &provider_response);

        let blueprint = self.resolve_blueprint(endpoint, Phase::Response, provider_protocol)?;
        let mut ctx = self.build_context(blueprint, Phase::Response, &request_id, endpoint);
        ctx.response = Some(provider_response);
        ctx.response_headers = response_headers;
        if let Some(provider_type) = provider_type {
            ctx.extra.insert(
                EXTRA_PROVIDER_TYPE.to_string(),
                Value::String(provider_type),
            );
        }

        if let Err(err) = self.orchestrator.execute(&mut ctx).await {
            return Err(err
                .into_gateway_error()
                .with_request_id(request_id.clone()));
        }

        let Some(body) = ctx.response.take() else {
            return Err(GatewayError::new(
                ErrorKind::Pipeline,
                "PIPELINE_NO_RESPONSE",
                "response pipeline produced no response",
            )
            .with_request_id(request_id));
        };
        self.snapshots
            .write_entry(dialect, &request_id, "response", &body);

        Ok(EngineOutcome::Buffered {
            body,
            headers: ctx.response_headers.clone(),
            synthesize_stream: request.stream,
        })
    }

    fn resolve_blueprint(
        &self,
        endpoint: EntryEndpoint,
        phase: Phase,
        provider_protocol: Protocol,
    ) -> Result<Arc<Blueprint>, GatewayError> {
        self.blueprints
            .resolve(endpoint, phase, provider_protocol, ProcessMode::Chat)
            .map(|blueprint| Arc::new(blueprint.clone()))
            .ok_or_else(|| {
                GatewayError::configuration(
                    "PIPELINE_NOT_FOUND",
                    format!(
                        "no {} pipeline for {} over {}",
                        phase.as_str(),
                        endpoint.path(),
                        provider_protocol.as_str()
                    ),
                )
            })
    }

    fn build_context(
        &self,
        blueprint: Arc<Blueprint>,
        phase: Phase,
        request_id: &str,
        endpoint: EntryEndpoint,
    ) -> crate::pipeline::context::PipelineContext {
        let metadata = PipelineMetadata {
            request_id: request_id.to_string(),
            entry_endpoint: endpoint.path().to_string(),
            pipeline_id: blueprint.id.clone(),
        };
        let snapshots = self.snapshots.clone();
        let errors = self.errors.clone();
        let request_id_for_errors = request_id.to_string();
        self.orchestrator
            .create_context(blueprint, phase, metadata)
            .on_error(Arc::new(move |node_error| {
                snapshots.write_stage(
                    &node_error.request_id,
                    &node_error.stage,
                    &serde_json::json!({"error": node_error.to_string()}),
                );
                errors.record_non_blocking(ErrorLogEntry::pipeline(
                    &node_error.request_id,
                    node_error.to_string(),
                    &node_error.stage,
                ));
            }))
            .on_warning(Arc::new(move |message| {
                warn!(
                    event = "pipeline.warning",
                    request_id = %request_id_for_errors,
                    message = %message
                );
            }))
    }
}

fn snapshot_dialect(endpoint: EntryEndpoint) -> SnapshotDialect {
    match endpoint {
        EntryEndpoint::ChatCompletions => SnapshotDialect::OpenAIChat,
        EntryEndpoint::Responses => SnapshotDialect::OpenAIResponses,
        EntryEndpoint::Messages => SnapshotDialect::AnthropicMessages,
    }
}
