//! Anthropic Messages ↔ OpenAI Chat Completions.

use serde_json::{Map, Value};

use routecodex_protocol::anthropic::messages::{
    AnthropicMessage, AnthropicTool, AnthropicUsage, ContentBlock, MessagesRequest,
    MessagesResponse,
};
use routecodex_protocol::openai::chat::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, FunctionCall,
    FunctionObject, ToolCall, ToolDefinition,
};

/// Default emitted when a chat request without `max_tokens` targets an
/// Anthropic upstream, which requires the field.
const DEFAULT_MAX_TOKENS: u64 = 4096;

pub fn messages_request_to_chat(request: MessagesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = request.system {
        if let Some(text) = system_text(&system) {
            messages.push(ChatMessage {
                role: ChatRole::System,
                content: Some(Value::String(text)),
                name: None,
                tool_calls: None,
                tool_call_id: None,
                extra: Map::new(),
            });
        }
    }

    for message in request.messages {
        append_anthropic_message(message, &mut messages);
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| ToolDefinition {
                kind: "function".to_string(),
                function: FunctionObject {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                    strict: None,
                },
            })
            .collect::<Vec<_>>()
    });

    let mut extra = Map::new();
    if let Some(stops) = request.stop_sequences {
        extra.insert("stop".to_string(), Value::from(stops));
    }

    ChatCompletionRequest {
        model: request.model,
        messages,
        tools,
        tool_choice: request.tool_choice.map(map_tool_choice_to_chat),
        stream: request.stream,
        stream_options: None,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
        metadata: request.metadata,
        extra,
    }
}

fn system_text(system: &Value) -> Option<String> {
    match system {
        Value::String(text) => (!text.is_empty()).then(|| text.clone()),
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}

fn append_anthropic_message(message: AnthropicMessage, messages: &mut Vec<ChatMessage>) {
    let role = if message.role == "assistant" {
        ChatRole::Assistant
    } else {
        ChatRole::User
    };

    let Value::Array(blocks) = message.content else {
        messages.push(ChatMessage {
            role,
            content: Some(message.content),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            extra: Map::new(),
        });
        return;
    };

    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        let kind = block.get("type").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                }
            }
            "tool_use" => {
                let arguments = block
                    .get("input")
                    .map(|input| input.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                tool_calls.push(ToolCall {
                    index: None,
                    id: block.get("id").and_then(Value::as_str).map(str::to_string),
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: block.get("name").and_then(Value::as_str).map(str::to_string),
                        arguments: Some(arguments),
                    },
                });
            }
            "tool_result" => {
                messages.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: block.get("content").cloned().map(flatten_tool_result),
                    name: None,
                    tool_calls: None,
                    tool_call_id: block
                        .get("tool_use_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    extra: Map::new(),
                });
            }
            _ => {}
        }
    }

    if !texts.is_empty() || !tool_calls.is_empty() {
        messages.push(ChatMessage {
            role,
            content: (!texts.is_empty()).then(|| Value::String(texts.join("\n"))),
            name: None,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            extra: Map::new(),
        });
    }
}

fn flatten_tool_result(content: Value) -> Value {
    match content {
        Value::Array(blocks) => {
            let texts: Vec<String> = blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            Value::String(texts.join("\n"))
        }
        other => other,
    }
}

fn map_tool_choice_to_chat(choice: Value) -> Value {
    let kind = choice.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "auto" => Value::String("auto".to_string()),
        "any" => Value::String("required".to_string()),
        "tool" => serde_json::json!({
            "type": "function",
            "function": {"name": choice.get("name").cloned().unwrap_or(Value::Null)}
        }),
        _ => choice,
    }
}

pub fn chat_request_to_messages(request: ChatCompletionRequest) -> MessagesRequest {
    let mut system: Vec<String> = Vec::new();
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for message in request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(Value::String(text)) = message.content {
                    system.push(text);
                }
            }
            ChatRole::Tool => {
                let block = serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.unwrap_or_default(),
                    "content": message.content.unwrap_or(Value::String(String::new())),
                });
                messages.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: Value::Array(vec![block]),
                    extra: Map::new(),
                });
            }
            ChatRole::User | ChatRole::Assistant => {
                let role = if message.role == ChatRole::Assistant {
                    "assistant"
                } else {
                    "user"
                };
                let mut blocks: Vec<Value> = Vec::new();
                match message.content {
                    Some(Value::String(text)) => {
                        blocks.push(serde_json::json!({"type": "text", "text": text}));
                    }
                    Some(Value::Array(parts)) => {
                        for part in parts {
                            if let Some(text) = part.get("text").and_then(Value::as_str) {
                                blocks.push(serde_json::json!({"type": "text", "text": text}));
                            }
                        }
                    }
                    _ => {}
                }
                for call in message.tool_calls.unwrap_or_default() {
                    let input = call
                        .function
                        .arguments
                        .as_deref()
                        .and_then(|args| serde_json::from_str::<Value>(args).ok())
                        .unwrap_or_else(|| Value::Object(Map::new()));
                    blocks.push(serde_json::json!({
                        "type": "tool_use",
                        "id": call.id.unwrap_or_default(),
                        "name": call.function.name.unwrap_or_default(),
                        "input": input,
                    }));
                }
                if !blocks.is_empty() {
                    messages.push(AnthropicMessage {
                        role: role.to_string(),
                        content: Value::Array(blocks),
                        extra: Map::new(),
                    });
                }
            }
        }
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| AnthropicTool {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool.function.parameters,
                extra: Map::new(),
            })
            .collect::<Vec<_>>()
    });

    MessagesRequest {
        model: request.model,
        max_tokens: Some(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        system: (!system.is_empty()).then(|| Value::String(system.join("\n\n"))),
        messages,
        tools,
        tool_choice: request.tool_choice.map(map_tool_choice_to_messages),
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: None,
        metadata: request.metadata,
        extra: Map::new(),
    }
}

fn map_tool_choice_to_messages(choice: Value) -> Value {
    match &choice {
        Value::String(mode) => match mode.as_str() {
            "required" => serde_json::json!({"type": "any"}),
            "none" => choice,
            _ => serde_json::json!({"type": "auto"}),
        },
        Value::Object(obj) => {
            let name = obj
                .get("function")
                .and_then(|function| function.get("name"))
                .cloned()
                .unwrap_or(Value::Null);
            serde_json::json!({"type": "tool", "name": name})
        }
        _ => choice,
    }
}

pub fn chat_response_to_messages(response: ChatCompletionResponse) -> MessagesResponse {
    let mut content: Vec<ContentBlock> = Vec::new();
    let mut stop_reason = "end_turn";

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(reasoning) = choice.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(ContentBlock {
                    kind: "thinking".to_string(),
                    thinking: Some(reasoning),
                    ..Default::default()
                });
            }
        }
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content.push(ContentBlock::text(text));
            }
        }
        let mut saw_tool_use = false;
        for call in choice.message.tool_calls.unwrap_or_default() {
            saw_tool_use = true;
            let input = call
                .function
                .arguments
                .as_deref()
                .and_then(|args| serde_json::from_str::<Value>(args).ok())
                .unwrap_or_else(|| Value::Object(Map::new()));
            content.push(ContentBlock {
                kind: "tool_use".to_string(),
                id: call.id,
                name: call.function.name,
                input: Some(input),
                ..Default::default()
            });
        }
        stop_reason = match choice.finish_reason.as_deref() {
            _ if saw_tool_use => "tool_use",
            Some("length") => "max_tokens",
            _ => "end_turn",
        };
    }

    MessagesResponse {
        id: response.id,
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: response.model,
        content,
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: response.usage.map(|usage| AnthropicUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            extra: Map::new(),
        }),
        extra: Map::new(),
    }
}

pub fn messages_response_to_chat(response: MessagesResponse) -> ChatCompletionResponse {
    use routecodex_protocol::openai::chat::{ChatChoice, ChatResponseMessage, Usage};

    let mut texts: Vec<String> = Vec::new();
    let mut reasoning: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in response.content {
        match block.kind.as_str() {
            "text" => {
                if let Some(text) = block.text {
                    texts.push(text);
                }
            }
            "thinking" => {
                if let Some(text) = block.thinking {
                    reasoning.push(text);
                }
            }
            "tool_use" => {
                tool_calls.push(ToolCall {
                    index: Some(tool_calls.len() as u32),
                    id: block.id,
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: block.name,
                        arguments: Some(
                            block
                                .input
                                .map(|input| input.to_string())
                                .unwrap_or_else(|| "{}".to_string()),
                        ),
                    },
                });
            }
            _ => {}
        }
    }

    let finish_reason = match response.stop_reason.as_deref() {
        Some("tool_use") => "tool_calls",
        Some("max_tokens") => "length",
        _ => "stop",
    };

    ChatCompletionResponse {
        id: response.id,
        object: "chat.completion".to_string(),
        created: 0,
        model: response.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatResponseMessage {
                role: ChatRole::Assistant,
                content: (!texts.is_empty()).then(|| texts.join("")),
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
            total_tokens: usage.input_tokens + usage.output_tokens,
            extra: Map::new(),
        }),
        extra: Map::new(),
    }
}
