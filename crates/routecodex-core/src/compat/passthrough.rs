use serde_json::Value;

use super::{CompatError, CompatibilityContext, CompatibilityModule};

/// Identity module; the default when a provider needs no shape fixes.
pub struct PassthroughCompatibility;

impl CompatibilityModule for PassthroughCompatibility {
    fn id(&self) -> &'static str {
        "passthrough"
    }

    fn kind(&self) -> &'static str {
        "passthrough"
    }

    fn process_incoming(
        &self,
        payload: Value,
        _ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::Direction;
    use crate::compat::tests::test_ctx;

    #[test]
    fn identity_in_both_directions() {
        let module = PassthroughCompatibility;
        let payload = serde_json::json!({"model": "m", "messages": []});
        assert_eq!(
            module
                .process_incoming(payload.clone(), &test_ctx(Direction::Incoming))
                .unwrap(),
            payload
        );
        assert_eq!(
            module
                .process_outgoing(payload.clone(), &test_ctx(Direction::Outgoing))
                .unwrap(),
            payload
        );
    }
}
