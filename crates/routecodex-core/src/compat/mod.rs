//! Compatibility layer: per-provider shape fixes applied between the
//! protocol switch and the transport.
//!
//! Modules are registered under a finite set of kind strings at startup;
//! user plugin directories may alias additional kind strings onto known
//! modules via `{type, module}` descriptor files. Unknown kinds fail at
//! construction time, never mid-request. Every module is idempotent:
//! feeding it a payload already in target shape is a no-op.

mod glm;
mod iflow;
mod lmstudio;
mod passthrough;
mod responses_bridge;

pub use glm::GlmCompatibility;
pub use iflow::IflowCompatibility;
pub use lmstudio::LmstudioCompatibility;
pub use passthrough::PassthroughCompatibility;
pub use responses_bridge::ResponsesBridgeCompatibility;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use routecodex_codec::{CodecError, CodecRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

/// Produced fresh for each node invocation, one per direction.
#[derive(Debug, Clone)]
pub struct CompatibilityContext {
    pub compatibility_id: String,
    pub profile_id: Option<String>,
    pub provider_type: String,
    pub direction: Direction,
    pub stage: String,
    pub request_id: String,
    pub entry_endpoint: String,
    pub metadata: Value,
}

#[derive(Debug)]
pub enum CompatError {
    Validation(String),
    Codec(CodecError),
    UnknownKind(String),
    PluginDescriptor { path: String, message: String },
}

impl fmt::Display for CompatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompatError::Validation(message) => write!(f, "compatibility validation: {message}"),
            CompatError::Codec(err) => write!(f, "compatibility codec: {err}"),
            CompatError::UnknownKind(kind) => {
                write!(f, "unknown compatibility kind: {kind}")
            }
            CompatError::PluginDescriptor { path, message } => {
                write!(f, "bad compatibility plugin descriptor {path}: {message}")
            }
        }
    }
}

impl std::error::Error for CompatError {}

impl From<CodecError> for CompatError {
    fn from(err: CodecError) -> Self {
        CompatError::Codec(err)
    }
}

pub trait CompatibilityModule: Send + Sync {
    fn id(&self) -> &'static str;

    /// The canonical kind string this module registers under.
    fn kind(&self) -> &'static str;

    fn provider_type(&self) -> Option<&'static str> {
        None
    }

    fn process_incoming(
        &self,
        payload: Value,
        ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError>;

    fn process_outgoing(
        &self,
        payload: Value,
        ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError>;
}

/// Startup-frozen module table: kind string (canonical or alias) →
/// module instance.
#[derive(Clone)]
pub struct CompatRegistry {
    modules: HashMap<String, Arc<dyn CompatibilityModule>>,
}

impl CompatRegistry {
    pub fn with_builtins(codecs: Arc<CodecRegistry>) -> Self {
        let mut modules: HashMap<String, Arc<dyn CompatibilityModule>> = HashMap::new();
        for module in [
            Arc::new(PassthroughCompatibility) as Arc<dyn CompatibilityModule>,
            Arc::new(GlmCompatibility),
            Arc::new(IflowCompatibility::new()),
            Arc::new(LmstudioCompatibility),
            Arc::new(ResponsesBridgeCompatibility::new(codecs)),
        ] {
            modules.insert(module.kind().to_string(), module);
        }
        // Historical alias kinds kept for user configs.
        let glm = modules["glm-compatibility"].clone();
        modules.insert("glm".to_string(), glm);
        Self { modules }
    }

    /// Alias an additional kind string onto an already-known module.
    /// Unknown targets fail loudly.
    pub fn register_alias(&mut self, alias: &str, target: &str) -> Result<(), CompatError> {
        let Some(module) = self.modules.get(target).cloned() else {
            return Err(CompatError::UnknownKind(target.to_string()));
        };
        debug!(event = "compat.alias", alias = %alias, target = %target);
        self.modules.insert(alias.to_string(), module);
        Ok(())
    }

    /// Load `{type, module}` descriptor files (`*.json`) from user plugin
    /// directories. Returns the number of aliases registered.
    pub fn load_plugin_dirs(&mut self, dirs: &[impl AsRef<Path>]) -> Result<usize, CompatError> {
        let mut count = 0;
        for dir in dirs {
            let dir = dir.as_ref();
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                let descriptor: Value = std::fs::read(&path)
                    .ok()
                    .and_then(|bytes| serde_json::from_slice(&bytes).ok())
                    .ok_or_else(|| CompatError::PluginDescriptor {
                        path: path.display().to_string(),
                        message: "unreadable or not json".to_string(),
                    })?;
                let kind = descriptor.get("type").and_then(Value::as_str);
                let module = descriptor.get("module").and_then(Value::as_str);
                let (Some(kind), Some(module)) = (kind, module) else {
                    return Err(CompatError::PluginDescriptor {
                        path: path.display().to_string(),
                        message: "missing type/module fields".to_string(),
                    });
                };
                self.register_alias(kind, module)?;
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn CompatibilityModule>, CompatError> {
        if let Some(module) = self.modules.get(kind) {
            return Ok(module.clone());
        }
        // The passthrough module tolerates alias kind spellings such as
        // `<provider>-compatibility`; log the normalization instead of
        // failing the request.
        if kind.ends_with("-compatibility") {
            warn!(event = "compat.normalized_alias", kind = %kind);
            return Ok(self.modules["passthrough"].clone());
        }
        Err(CompatError::UnknownKind(kind.to_string()))
    }

    /// Module applied for a provider when the blueprint does not name one
    /// explicitly.
    pub fn for_provider(&self, provider_type: &str) -> Arc<dyn CompatibilityModule> {
        let kind = match provider_type {
            "glm" => "glm-compatibility",
            "iflow" => "iflow-compatibility",
            "lmstudio" => "lmstudio-compatibility",
            _ => "passthrough",
        };
        self.modules[kind].clone()
    }
}
