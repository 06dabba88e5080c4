pub mod blueprint;
pub mod context;
pub mod node;
pub mod nodes;
pub mod orchestrator;

pub use blueprint::{
    Blueprint, BlueprintSet, NodeDescriptor, NodeKind, Phase, ProcessMode, StreamingMode,
    codec_for, default_blueprint_set, default_blueprints,
};
pub use context::{PipelineContext, PipelineMetadata, StreamHandle};
pub use node::{NodeError, NodeRegistry, PipelineNode, PipelineNodeError};
pub use nodes::{EXTRA_INBOUND, EXTRA_PROVIDER_PAYLOAD, EXTRA_PROVIDER_TYPE, default_node_registry};
pub use orchestrator::Orchestrator;
