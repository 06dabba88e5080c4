//! The node abstraction and the implementation registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::blueprint::NodeDescriptor;
use super::context::PipelineContext;
use crate::error::GatewayError;

pub type NodeError = Box<dyn std::error::Error + Send + Sync>;

/// Structured wrapper for any error escaping a node. The original cause
/// is preserved so downstream mappers can read provider codes.
#[derive(Debug)]
pub struct PipelineNodeError {
    pub node_id: String,
    pub implementation: String,
    pub pipeline_id: String,
    pub request_id: String,
    pub phase: &'static str,
    /// `<kind>:<id>` of the failing node.
    pub stage: String,
    pub cause: NodeError,
}

impl std::fmt::Display for PipelineNodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pipeline node {} failed at {} ({} phase): {}",
            self.node_id, self.stage, self.phase, self.cause
        )
    }
}

impl std::error::Error for PipelineNodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

impl PipelineNodeError {
    /// Surface the wrapped error to the client. A [`GatewayError`] cause
    /// passes through unchanged so router/provider codes survive; other
    /// causes become a pipeline-kind error.
    pub fn into_gateway_error(self) -> GatewayError {
        match self.cause.downcast::<GatewayError>() {
            Ok(inner) => *inner,
            Err(cause) => {
                let mut err = GatewayError::new(
                    crate::error::ErrorKind::Pipeline,
                    "PIPELINE_NODE_ERROR",
                    cause.to_string(),
                );
                err.details = serde_json::json!({
                    "stage": self.stage,
                    "nodeId": self.node_id,
                    "implementation": self.implementation,
                    "pipelineId": self.pipeline_id,
                    "phase": self.phase,
                });
                err.with_request_id(self.request_id)
            }
        }
    }
}

#[async_trait]
pub trait PipelineNode: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), NodeError>;
}

pub type NodeFactory =
    Arc<dyn Fn(&NodeDescriptor) -> Result<Arc<dyn PipelineNode>, NodeError> + Send + Sync>;

/// Maps implementation strings to factories. Populated at startup,
/// frozen before traffic.
#[derive(Default, Clone)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, implementation: impl Into<String>, factory: NodeFactory) {
        self.factories.insert(implementation.into(), factory);
    }

    pub fn instantiate(
        &self,
        descriptor: &NodeDescriptor,
    ) -> Result<Arc<dyn PipelineNode>, NodeError> {
        let Some(factory) = self.factories.get(&descriptor.implementation) else {
            return Err(format!(
                "unknown node implementation: {}",
                descriptor.implementation
            )
            .into());
        };
        factory(descriptor)
    }

    pub fn implementations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
