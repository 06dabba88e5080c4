//! OpenAI Responses ↔ OpenAI Chat Completions.

use serde_json::{Map, Value};

use routecodex_protocol::openai::chat::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatResponseMessage,
    ChatRole, FunctionCall, FunctionObject, ToolCall, ToolDefinition, Usage,
};
use routecodex_protocol::openai::responses::{
    InputItem, OutputContent, OutputItem, ResponsesInput, ResponsesRequest, ResponsesResponse,
    ResponsesTool, ResponsesUsage,
};

pub fn responses_request_to_chat(request: ResponsesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(instructions) = request.instructions {
        if !instructions.is_empty() {
            messages.push(ChatMessage {
                role: ChatRole::System,
                content: Some(Value::String(instructions)),
                name: None,
                tool_calls: None,
                tool_call_id: None,
                extra: Map::new(),
            });
        }
    }

    match request.input {
        Some(ResponsesInput::Text(text)) => messages.push(ChatMessage::user_text(text)),
        Some(ResponsesInput::Items(items)) => {
            for item in items {
                append_input_item(item, &mut messages);
            }
        }
        None => {}
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .filter(|tool| tool.kind == "function")
            .filter_map(|tool| {
                Some(ToolDefinition {
                    kind: "function".to_string(),
                    function: FunctionObject {
                        name: tool.name?,
                        description: tool.description,
                        parameters: tool.parameters,
                        strict: tool.strict,
                    },
                })
            })
            .collect::<Vec<_>>()
    });

    ChatCompletionRequest {
        model: request.model,
        messages,
        tools: tools.filter(|tools| !tools.is_empty()),
        tool_choice: request.tool_choice,
        stream: request.stream,
        stream_options: None,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_output_tokens,
        metadata: request.metadata,
        extra: Map::new(),
    }
}

fn append_input_item(item: InputItem, messages: &mut Vec<ChatMessage>) {
    match item.kind.as_deref() {
        None | Some("message") => {
            let role = match item.role.as_deref() {
                Some("assistant") => ChatRole::Assistant,
                Some("system") => ChatRole::System,
                Some("developer") => ChatRole::Developer,
                _ => ChatRole::User,
            };
            let content = item.content.map(normalize_input_content);
            messages.push(ChatMessage {
                role,
                content,
                name: None,
                tool_calls: None,
                tool_call_id: None,
                extra: Map::new(),
            });
        }
        Some("function_call") => {
            messages.push(ChatMessage {
                role: ChatRole::Assistant,
                content: None,
                name: None,
                tool_calls: Some(vec![ToolCall {
                    index: None,
                    id: item.call_id.clone(),
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: item.name,
                        arguments: item.arguments,
                    },
                }]),
                tool_call_id: None,
                extra: Map::new(),
            });
        }
        Some("function_call_output") => {
            let content = item.output.map(|output| match output {
                Value::String(text) => Value::String(text),
                other => Value::String(other.to_string()),
            });
            messages.push(ChatMessage {
                role: ChatRole::Tool,
                content,
                name: None,
                tool_calls: None,
                tool_call_id: item.call_id,
                extra: Map::new(),
            });
        }
        Some(_) => {}
    }
}

/// Responses content parts use `input_text`/`output_text`; chat parts use
/// `text`. Strings pass through untouched.
fn normalize_input_content(content: Value) -> Value {
    let Value::Array(parts) = content else {
        return content;
    };
    let mapped: Vec<Value> = parts
        .into_iter()
        .map(|part| {
            let Value::Object(mut obj) = part else {
                return part_from_value(part);
            };
            let kind = obj.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind == "input_text" || kind == "output_text" {
                obj.insert("type".to_string(), Value::String("text".to_string()));
            }
            Value::Object(obj)
        })
        .collect();
    Value::Array(mapped)
}

fn part_from_value(part: Value) -> Value {
    match part {
        Value::String(text) => serde_json::json!({"type": "text", "text": text}),
        other => other,
    }
}

pub fn chat_request_to_responses(request: ChatCompletionRequest) -> ResponsesRequest {
    let mut instructions: Vec<String> = Vec::new();
    let mut items = Vec::new();

    for message in request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(Value::String(text)) = message.content {
                    instructions.push(text);
                }
            }
            ChatRole::Tool => {
                items.push(InputItem {
                    kind: Some("function_call_output".to_string()),
                    call_id: message.tool_call_id,
                    output: message.content,
                    ..Default::default()
                });
            }
            ChatRole::User | ChatRole::Assistant => {
                if let Some(tool_calls) = message.tool_calls {
                    for call in tool_calls {
                        items.push(InputItem {
                            kind: Some("function_call".to_string()),
                            call_id: call.id,
                            name: call.function.name,
                            arguments: call.function.arguments,
                            ..Default::default()
                        });
                    }
                }
                if message.content.is_some() {
                    items.push(InputItem {
                        kind: Some("message".to_string()),
                        role: Some(role_name(message.role).to_string()),
                        content: message.content,
                        ..Default::default()
                    });
                }
            }
        }
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| ResponsesTool {
                kind: "function".to_string(),
                name: Some(tool.function.name),
                description: tool.function.description,
                parameters: tool.function.parameters,
                strict: tool.function.strict,
                extra: Map::new(),
            })
            .collect::<Vec<_>>()
    });

    ResponsesRequest {
        model: request.model,
        input: (!items.is_empty()).then_some(ResponsesInput::Items(items)),
        instructions: (!instructions.is_empty()).then(|| instructions.join("\n\n")),
        tools,
        tool_choice: request.tool_choice,
        stream: request.stream,
        max_output_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        metadata: request.metadata,
        extra: Map::new(),
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::Developer => "developer",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

pub fn chat_response_to_responses(response: ChatCompletionResponse) -> ResponsesResponse {
    let mut output = Vec::new();
    let mut status = Some("completed".to_string());

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(reasoning) = choice.message.reasoning_content {
            if !reasoning.is_empty() {
                output.push(OutputItem {
                    kind: "reasoning".to_string(),
                    content: Some(vec![OutputContent {
                        kind: "reasoning_text".to_string(),
                        text: reasoning,
                        extra: Map::new(),
                    }]),
                    ..Default::default()
                });
            }
        }
        if let Some(text) = choice.message.content {
            output.push(OutputItem {
                kind: "message".to_string(),
                role: Some("assistant".to_string()),
                status: Some("completed".to_string()),
                content: Some(vec![OutputContent {
                    kind: "output_text".to_string(),
                    text,
                    extra: Map::new(),
                }]),
                ..Default::default()
            });
        }
        if let Some(calls) = choice.message.tool_calls {
            for call in calls {
                output.push(OutputItem {
                    kind: "function_call".to_string(),
                    call_id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                    status: Some("completed".to_string()),
                    ..Default::default()
                });
            }
        }
        if choice.finish_reason.as_deref() == Some("length") {
            status = Some("incomplete".to_string());
        }
    }

    ResponsesResponse {
        id: response.id,
        object: "response".to_string(),
        created_at: response.created,
        status,
        model: response.model,
        output,
        usage: response.usage.map(|usage| ResponsesUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            extra: Map::new(),
        }),
        extra: Map::new(),
    }
}

pub fn responses_response_to_chat(response: ResponsesResponse) -> ChatCompletionResponse {
    let mut content: Vec<String> = Vec::new();
    let mut reasoning: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for item in response.output {
        match item.kind.as_str() {
            "message" => {
                for part in item.content.unwrap_or_default() {
                    if part.kind == "output_text" && !part.text.is_empty() {
                        content.push(part.text);
                    }
                }
            }
            "reasoning" => {
                for part in item.content.unwrap_or_default() {
                    if !part.text.is_empty() {
                        reasoning.push(part.text);
                    }
                }
            }
            "function_call" => {
                tool_calls.push(ToolCall {
                    index: Some(tool_calls.len() as u32),
                    id: item.call_id,
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: item.name,
                        arguments: item.arguments,
                    },
                });
            }
            _ => {}
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        "tool_calls"
    } else if response.status.as_deref() == Some("incomplete") {
        "length"
    } else {
        "stop"
    };

    ChatCompletionResponse {
        id: response.id,
        object: "chat.completion".to_string(),
        created: response.created_at,
        model: response.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatResponseMessage {
                role: ChatRole::Assistant,
                content: (!content.is_empty()).then(|| content.join("")),
                reasoning_content: (!reasoning.is_empty()).then(|| reasoning.join("")),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                extra: Map::new(),
            },
            finish_reason: Some(finish_reason.to_string()),
            extra: Map::new(),
        }],
        usage: response.usage.map(|usage| Usage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            extra: Map::new(),
        }),
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_chat() -> ChatCompletionRequest {
        serde_json::from_value(serde_json::json!({
            "model": "glm-4.6",
            "messages": [{"role": "user", "content": "hello"}],
            "tools": [{
                "type": "function",
                "function": {"name": "lookup", "parameters": {"type": "object"}}
            }]
        }))
        .unwrap()
    }

    #[test]
    fn chat_to_responses_and_back_preserves_core_fields() {
        let original = minimal_chat();
        let responses = chat_request_to_responses(original.clone());
        let back = responses_request_to_chat(responses);
        assert_eq!(back.model, original.model);
        assert_eq!(back.messages, original.messages);
        assert_eq!(back.tools, original.tools);
    }

    #[test]
    fn instructions_become_system_message() {
        let request: ResponsesRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "instructions": "be terse",
            "input": "hi"
        }))
        .unwrap();
        let chat = responses_request_to_chat(request);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, ChatRole::System);
        assert_eq!(chat.messages[1].role, ChatRole::User);
    }

    #[test]
    fn input_text_parts_map_to_chat_text_parts() {
        let request: ResponsesRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "input": [{"role": "user", "content": [{"type": "input_text", "text": "hello"}]}]
        }))
        .unwrap();
        let chat = responses_request_to_chat(request);
        let parts = chat.messages[0].content.as_ref().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "hello");
    }

    #[test]
    fn chat_response_maps_tool_calls_to_function_call_items() {
        let response: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "created": 7,
            "model": "m",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"q\":1}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
        }))
        .unwrap();
        let responses = chat_response_to_responses(response);
        assert_eq!(responses.output.len(), 1);
        assert_eq!(responses.output[0].kind, "function_call");
        assert_eq!(responses.output[0].call_id.as_deref(), Some("call_9"));
        assert_eq!(responses.usage.as_ref().unwrap().input_tokens, 3);

        let chat_back = responses_response_to_chat(responses);
        let calls = chat_back.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_9"));
        assert_eq!(chat_back.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }
}
