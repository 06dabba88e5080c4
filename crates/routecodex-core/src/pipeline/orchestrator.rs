//! Sequential node execution with structured error wrapping.

use std::sync::Arc;

use tracing::debug;

use super::blueprint::{Blueprint, Phase};
use super::context::{PipelineContext, PipelineMetadata};
use super::node::{NodeRegistry, PipelineNodeError};

pub struct Orchestrator {
    registry: NodeRegistry,
}

impl Orchestrator {
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn create_context(
        &self,
        blueprint: Arc<Blueprint>,
        phase: Phase,
        metadata: PipelineMetadata,
    ) -> PipelineContext {
        PipelineContext::new(blueprint, phase, metadata)
    }

    /// Run the context's nodes in blueprint order. Any node error aborts
    /// the pipeline; it is wrapped, reported through the context's error
    /// callback, and re-thrown.
    pub async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), PipelineNodeError> {
        let blueprint = ctx.blueprint.clone();
        for descriptor in &blueprint.nodes {
            let node = match self.registry.instantiate(descriptor) {
                Ok(node) => node,
                Err(cause) => {
                    let wrapped = PipelineNodeError {
                        node_id: descriptor.id.clone(),
                        implementation: descriptor.implementation.clone(),
                        pipeline_id: blueprint.id.clone(),
                        request_id: ctx.metadata.request_id.clone(),
                        phase: ctx.phase.as_str(),
                        stage: descriptor.stage(),
                        cause,
                    };
                    ctx.emit_error(&wrapped);
                    return Err(wrapped);
                }
            };

            debug!(
                event = "pipeline.node",
                request_id = %ctx.metadata.request_id,
                stage = %descriptor.stage()
            );
            if let Err(cause) = node.execute(ctx).await {
                let wrapped = PipelineNodeError {
                    node_id: descriptor.id.clone(),
                    implementation: descriptor.implementation.clone(),
                    pipeline_id: blueprint.id.clone(),
                    request_id: ctx.metadata.request_id.clone(),
                    phase: ctx.phase.as_str(),
                    stage: descriptor.stage(),
                    cause,
                };
                ctx.emit_error(&wrapped);
                return Err(wrapped);
            }
        }
        Ok(())
    }
}
