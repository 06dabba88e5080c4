//! Per-request pipeline state.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use super::blueprint::{Blueprint, Phase};
use super::node::PipelineNodeError;
use crate::router::{RequestScope, RouteSelection};
use routecodex_provider::Headers;

/// An upstream SSE stream handed through the pipeline to the emitter.
pub struct StreamHandle {
    pub status: u16,
    pub headers: Headers,
    pub rx: mpsc::Receiver<Bytes>,
}

pub type ErrorCallback = Arc<dyn Fn(&PipelineNodeError) + Send + Sync>;
pub type WarningCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PipelineMetadata {
    pub request_id: String,
    pub entry_endpoint: String,
    pub pipeline_id: String,
}

/// Exclusively owns the per-request request/response values; nodes
/// mutate only through this context.
pub struct PipelineContext {
    pub blueprint: Arc<Blueprint>,
    pub phase: Phase,
    pub metadata: PipelineMetadata,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub extra: HashMap<String, Value>,
    pub warnings: Vec<String>,
    /// Candidate list for the provider node.
    pub route: Option<RouteSelection>,
    pub scope: Option<RequestScope>,
    /// Client asked for SSE output.
    pub stream_requested: bool,
    /// Provider call should stream (entry and provider dialects match).
    pub stream_upstream: bool,
    pub upstream_stream: Option<StreamHandle>,
    pub response_headers: Headers,
    error_callback: Option<ErrorCallback>,
    warning_callback: Option<WarningCallback>,
}

impl PipelineContext {
    pub fn new(blueprint: Arc<Blueprint>, phase: Phase, metadata: PipelineMetadata) -> Self {
        Self {
            blueprint,
            phase,
            metadata,
            request: None,
            response: None,
            extra: HashMap::new(),
            warnings: Vec::new(),
            route: None,
            scope: None,
            stream_requested: false,
            stream_upstream: false,
            upstream_stream: None,
            response_headers: Vec::new(),
            error_callback: None,
            warning_callback: None,
        }
    }

    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.error_callback = Some(callback);
        self
    }

    pub fn on_warning(mut self, callback: WarningCallback) -> Self {
        self.warning_callback = Some(callback);
        self
    }

    /// Warnings are side-channel; they never abort the pipeline.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if let Some(callback) = &self.warning_callback {
            callback(&message);
        }
        self.warnings.push(message);
    }

    pub(crate) fn emit_error(&self, error: &PipelineNodeError) {
        if let Some(callback) = &self.error_callback {
            callback(error);
        }
    }

    pub fn extra_bool(&self, key: &str) -> bool {
        self.extra
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}
