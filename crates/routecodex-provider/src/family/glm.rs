use serde_json::Value;

use super::{BodyInput, FamilyProfile};

/// GLM rejects assistant messages whose `content` is not a string.
pub struct GlmProfile;

impl FamilyProfile for GlmProfile {
    fn id(&self) -> &'static str {
        "glm"
    }

    fn family(&self) -> &'static str {
        "glm"
    }

    fn build_request_body(&self, input: &BodyInput<'_>) -> Option<Value> {
        let mut body = input.default_body.clone();
        if coerce_assistant_content(&mut body) {
            Some(body)
        } else {
            None
        }
    }
}

/// Force every assistant message's `content` to a string:
/// `null → ""`, objects/arrays → their JSON text, strings untouched.
/// Returns whether anything changed.
pub fn coerce_assistant_content(body: &mut Value) -> bool {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return false;
    };
    let mut changed = false;
    for message in messages {
        if message.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(content) = message.get_mut("content") else {
            continue;
        };
        match content {
            Value::String(_) => {}
            Value::Null => {
                *content = Value::String(String::new());
                changed = true;
            }
            ref other => {
                *content = Value::String(other.to_string());
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_rules() {
        let mut body = serde_json::json!({
            "messages": [
                {"role": "assistant", "content": null},
                {"role": "assistant", "content": {"parts": [1, 2]}},
                {"role": "assistant", "content": "already text"},
                {"role": "user", "content": {"untouched": true}}
            ]
        });
        assert!(coerce_assistant_content(&mut body));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["content"], "");
        assert_eq!(messages[1]["content"], "{\"parts\":[1,2]}");
        assert_eq!(messages[2]["content"], "already text");
        assert!(messages[3]["content"].is_object());
    }

    #[test]
    fn idempotent_on_clean_bodies() {
        let mut body = serde_json::json!({
            "messages": [{"role": "assistant", "content": "text"}]
        });
        assert!(!coerce_assistant_content(&mut body));
    }
}
