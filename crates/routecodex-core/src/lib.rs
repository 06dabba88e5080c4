//! Request-execution core: pipeline orchestration, the virtual router
//! with cooldown-aware failover, per-provider compatibility modules, and
//! best-effort observability sinks.

pub mod compat;
pub mod config;
pub mod engine;
pub mod error;
pub mod errorlog;
pub mod pipeline;
pub mod router;
pub mod snapshot;

pub use compat::{CompatError, CompatRegistry, CompatibilityContext, CompatibilityModule, Direction};
pub use config::{ProviderEntry, RoutesConfig, static_base_url};
pub use engine::{Engine, EngineOutcome, GatewayRequest};
pub use error::{ErrorKind, GatewayError};
pub use errorlog::{ErrorLog, ErrorLogEntry};
pub use pipeline::{
    Blueprint, BlueprintSet, NodeRegistry, Orchestrator, Phase, PipelineContext,
    PipelineNodeError, default_blueprint_set,
};
pub use router::{DispatchSuccess, RequestScope, RouteSelection, RouteTarget, VirtualRouter};
pub use snapshot::{SnapshotDialect, SnapshotWriter};
