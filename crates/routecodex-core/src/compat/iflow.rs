//! iFlow shape fixes: field mapping, tool cleaning, request validation,
//! and response normalization. Each direction applies an ordered list of
//! hooks; every hook is a no-op on an already-normalized payload.

use serde_json::Value;

use super::{CompatError, CompatibilityContext, CompatibilityModule};

type Hook = fn(&mut Value);

pub struct IflowCompatibility {
    incoming_hooks: Vec<Hook>,
    outgoing_hooks: Vec<Hook>,
}

impl IflowCompatibility {
    pub fn new() -> Self {
        Self {
            incoming_hooks: vec![map_request_fields, clean_tools, drop_null_messages],
            outgoing_hooks: vec![normalize_finish_reason, ensure_choice_messages],
        }
    }
}

impl Default for IflowCompatibility {
    fn default() -> Self {
        Self::new()
    }
}

impl CompatibilityModule for IflowCompatibility {
    fn id(&self) -> &'static str {
        "iflow"
    }

    fn kind(&self) -> &'static str {
        "iflow-compatibility"
    }

    fn provider_type(&self) -> Option<&'static str> {
        Some("iflow")
    }

    fn process_incoming(
        &self,
        mut payload: Value,
        _ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError> {
        if payload.get("model").and_then(Value::as_str).is_none() {
            return Err(CompatError::Validation(
                "iflow request requires a string model".to_string(),
            ));
        }
        for hook in &self.incoming_hooks {
            hook(&mut payload);
        }
        Ok(payload)
    }

    fn process_outgoing(
        &self,
        mut payload: Value,
        _ctx: &CompatibilityContext,
    ) -> Result<Value, CompatError> {
        for hook in &self.outgoing_hooks {
            hook(&mut payload);
        }
        Ok(payload)
    }
}

/// iFlow speaks the chat dialect with `max_tokens`; callers bridged from
/// the Responses dialect may still carry `max_output_tokens`.
fn map_request_fields(payload: &mut Value) {
    let Some(object) = payload.as_object_mut() else {
        return;
    };
    if !object.contains_key("max_tokens")
        && let Some(value) = object.remove("max_output_tokens")
    {
        object.insert("max_tokens".to_string(), value);
    }
}

/// Drop tool entries the upstream rejects: nulls and functions without a
/// name. An emptied list is removed entirely.
fn clean_tools(payload: &mut Value) {
    let Some(tools) = payload.get_mut("tools").and_then(Value::as_array_mut) else {
        return;
    };
    tools.retain(|tool| {
        tool.get("function")
            .and_then(|function| function.get("name"))
            .and_then(Value::as_str)
            .is_some_and(|name| !name.is_empty())
    });
    if tools.is_empty()
        && let Some(object) = payload.as_object_mut()
    {
        object.remove("tools");
    }
}

fn drop_null_messages(payload: &mut Value) {
    if let Some(messages) = payload.get_mut("messages").and_then(Value::as_array_mut) {
        messages.retain(|message| message.is_object());
    }
}

/// iFlow occasionally reports the singular `tool_call` finish reason.
fn normalize_finish_reason(payload: &mut Value) {
    let Some(choices) = payload.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };
    for choice in choices {
        if choice.get("finish_reason").and_then(Value::as_str) == Some("tool_call") {
            choice["finish_reason"] = Value::String("tool_calls".to_string());
        }
    }
}

/// Guarantee each choice has a message object so downstream codecs can
/// decode without special cases.
fn ensure_choice_messages(payload: &mut Value) {
    let Some(choices) = payload.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };
    for choice in choices {
        let Some(choice) = choice.as_object_mut() else {
            continue;
        };
        if !choice.contains_key("message") {
            choice.insert(
                "message".to_string(),
                serde_json::json!({"role": "assistant", "content": ""}),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::Direction;
    use crate::compat::tests::test_ctx;

    #[test]
    fn request_mapping_and_tool_cleaning() {
        let module = IflowCompatibility::new();
        let payload = serde_json::json!({
            "model": "qwen3-coder",
            "max_output_tokens": 256,
            "messages": [{"role": "user", "content": "hi"}, null],
            "tools": [
                {"type": "function", "function": {"name": "ok"}},
                {"type": "function", "function": {"name": ""}},
                null
            ]
        });
        let out = module
            .process_incoming(payload, &test_ctx(Direction::Incoming))
            .unwrap();
        assert_eq!(out["max_tokens"], 256);
        assert!(out.get("max_output_tokens").is_none());
        assert_eq!(out["tools"].as_array().unwrap().len(), 1);
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn request_without_model_is_rejected() {
        let module = IflowCompatibility::new();
        let err = module
            .process_incoming(serde_json::json!({}), &test_ctx(Direction::Incoming))
            .unwrap_err();
        assert!(matches!(err, CompatError::Validation(_)));
    }

    #[test]
    fn response_normalization_is_idempotent() {
        let module = IflowCompatibility::new();
        let payload = serde_json::json!({
            "id": "x",
            "choices": [{"index": 0, "finish_reason": "tool_call"}]
        });
        let once = module
            .process_outgoing(payload, &test_ctx(Direction::Outgoing))
            .unwrap();
        assert_eq!(once["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(once["choices"][0]["message"]["role"], "assistant");

        let twice = module
            .process_outgoing(once.clone(), &test_ctx(Direction::Outgoing))
            .unwrap();
        assert_eq!(once, twice);
    }
}
