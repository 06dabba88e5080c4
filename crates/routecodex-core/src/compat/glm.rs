use serde_json::Value;

use routecodex_provider::coerce_assistant_content;

use super::{CompatError, CompatibilityContext, CompatibilityModule};

/// GLM requires assistant `content` to be a string in request bodies.
/// Responses pass through untouched.
pub struct GlmCompatibility;

impl CompatibilityModule for GlmCompatibility {
    fn id(&self) -> &'static str {
        "glm"
    }

    fn kind(&self) -> &'static str {
        "glm-compatibility"
    }

    fn provider_type(&self) -> Option<&'static str> {
        Some("glm")
    }

    fn process_incoming(
        &self,
        mut payload: Value,
        _ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError> {
        coerce_assistant_content(&mut payload);
        Ok(payload)
    }

    fn process_outgoing(
        &self,
        payload: Value,
        _ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError> {
        Ok(payload)
    }
}
