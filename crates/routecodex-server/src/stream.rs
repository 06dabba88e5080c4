//! SSE emission: synthesized chunk streams from buffered responses, and
//! verbatim pass-through of upstream streams with keep-alive comments.

use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use routecodex_protocol::{EntryEndpoint, sse};

/// Delay between synthesized deltas so slow clients are not saturated.
const CHUNK_PACING: Duration = Duration::from_millis(10);
/// Max characters per synthesized content delta.
const DELTA_CHARS: usize = 64;
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Remove `<think>`/`<thinking>` spans from streamed content. An
/// unclosed opening tag swallows the rest of the text.
pub fn strip_thinking_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let open = ["<think>", "<thinking>"]
            .iter()
            .filter_map(|tag| rest.find(tag).map(|at| (at, *tag)))
            .min_by_key(|(at, _)| *at);
        let Some((at, tag)) = open else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..at]);
        let close: &str = match tag {
            "<think>" => "</think>",
            _ => "</thinking>",
        };
        match rest[at..].find(close) {
            Some(end) => rest = &rest[at + end + close.len()..],
            None => return out,
        }
    }
}

fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(DELTA_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[derive(Debug, Default)]
struct SynthesisSource {
    id: String,
    model: String,
    created: i64,
    content: String,
    tool_calls: Vec<(Option<String>, Option<String>, String)>,
    finish_reason: Option<String>,
}

fn source_from_chat(body: &Value) -> SynthesisSource {
    let mut source = SynthesisSource {
        id: body["id"].as_str().unwrap_or("chatcmpl").to_string(),
        model: body["model"].as_str().unwrap_or("unknown").to_string(),
        created: body["created"].as_i64().unwrap_or(0),
        ..Default::default()
    };
    let Some(choice) = body["choices"].as_array().and_then(|choices| choices.first()) else {
        return source;
    };
    source.finish_reason = choice["finish_reason"].as_str().map(str::to_string);
    let message = &choice["message"];
    if let Some(text) = message["content"].as_str() {
        source.content = strip_thinking_tags(text);
    }
    for call in message["tool_calls"].as_array().into_iter().flatten() {
        source.tool_calls.push((
            call["id"].as_str().map(str::to_string),
            call["function"]["name"].as_str().map(str::to_string),
            call["function"]["arguments"].as_str().unwrap_or("").to_string(),
        ));
    }
    source
}

fn source_from_responses(body: &Value) -> SynthesisSource {
    let mut source = SynthesisSource {
        id: body["id"].as_str().unwrap_or("resp").to_string(),
        model: body["model"].as_str().unwrap_or("unknown").to_string(),
        created: body["created_at"].as_i64().unwrap_or(0),
        ..Default::default()
    };
    for item in body["output"].as_array().into_iter().flatten() {
        match item["type"].as_str().unwrap_or_default() {
            "message" => {
                for part in item["content"].as_array().into_iter().flatten() {
                    if part["type"] == "output_text"
                        && let Some(text) = part["text"].as_str()
                    {
                        source.content.push_str(&strip_thinking_tags(text));
                    }
                }
            }
            "function_call" => {
                source.tool_calls.push((
                    item["call_id"].as_str().map(str::to_string),
                    item["name"].as_str().map(str::to_string),
                    item["arguments"].as_str().unwrap_or("").to_string(),
                ));
            }
            _ => {}
        }
    }
    if body["status"] == "incomplete" {
        source.finish_reason = Some("length".to_string());
    }
    source
}

fn chunk_frame(source: &SynthesisSource, delta: Value, finish_reason: Option<&str>) -> String {
    let frame = json!({
        "id": source.id,
        "object": "chat.completion.chunk",
        "created": source.created,
        "model": source.model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    });
    sse::encode_event(None, &frame.to_string())
}

/// Chat-chunk frames per the synthesized-delta contract: role first,
/// paced content deltas, tool-call name then argument deltas, a final
/// empty delta with the finish reason.
fn chat_frames(source: &SynthesisSource) -> Vec<String> {
    let mut frames = Vec::new();
    frames.push(chunk_frame(source, json!({"role": "assistant"}), None));

    for piece in chunk_text(&source.content) {
        frames.push(chunk_frame(source, json!({"content": piece}), None));
    }

    for (index, (id, name, arguments)) in source.tool_calls.iter().enumerate() {
        frames.push(chunk_frame(
            source,
            json!({"tool_calls": [{
                "index": index,
                "id": id,
                "type": "function",
                "function": {"name": name},
            }]}),
            None,
        ));
        for piece in chunk_text(arguments) {
            frames.push(chunk_frame(
                source,
                json!({"tool_calls": [{
                    "index": index,
                    "function": {"arguments": piece},
                }]}),
                None,
            ));
        }
    }

    let finish = if !source.tool_calls.is_empty() {
        "tool_calls"
    } else {
        source.finish_reason.as_deref().unwrap_or("stop")
    };
    frames.push(chunk_frame(source, json!({}), Some(finish)));
    frames
}

fn anthropic_frames(body: &Value) -> Vec<String> {
    let mut frames = Vec::new();
    frames.push(sse::encode_event(
        Some("message_start"),
        &json!({"type": "message_start", "message": {
            "id": body["id"],
            "type": "message",
            "role": "assistant",
            "model": body["model"],
            "content": [],
        }})
        .to_string(),
    ));
    for block in body["content"].as_array().into_iter().flatten() {
        if block["type"] == "text"
            && let Some(text) = block["text"].as_str()
        {
            for piece in chunk_text(&strip_thinking_tags(text)) {
                frames.push(sse::encode_event(
                    Some("content_block_delta"),
                    &json!({"type": "content_block_delta", "index": 0,
                            "delta": {"type": "text_delta", "text": piece}})
                    .to_string(),
                ));
            }
        }
    }
    frames.push(sse::encode_event(
        Some("message_delta"),
        &json!({"type": "message_delta", "delta": {
            "stop_reason": body["stop_reason"],
        }})
        .to_string(),
    ));
    frames.push(sse::encode_event(
        Some("message_stop"),
        &json!({"type": "message_stop"}).to_string(),
    ));
    frames
}

/// Frames for one synthesized stream, in emission order, excluding the
/// `[DONE]` terminator.
pub fn synthesis_frames(endpoint: EntryEndpoint, body: &Value) -> Vec<String> {
    match endpoint {
        EntryEndpoint::ChatCompletions => chat_frames(&source_from_chat(body)),
        EntryEndpoint::Responses => {
            let mut frames = chat_frames(&source_from_responses(body));
            frames.push(sse::encode_event(
                Some("response.completed"),
                &json!({"type": "response.completed", "response": body}).to_string(),
            ));
            frames
        }
        EntryEndpoint::Messages => anthropic_frames(body),
    }
}

/// Spawn the paced emitter and return the client-facing byte stream.
pub fn synthesize(endpoint: EntryEndpoint, body: Value) -> ReceiverStream<Bytes> {
    let frames = synthesis_frames(endpoint, &body);
    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        for frame in frames {
            if tx.send(Bytes::from(frame)).await.is_err() {
                // Client went away; stop emitting.
                return;
            }
            tokio::time::sleep(CHUNK_PACING).await;
        }
        let _ = tx.send(Bytes::from(sse::encode_done())).await;
    });
    ReceiverStream::new(rx)
}

/// Copy an upstream SSE stream to the client verbatim, inserting
/// keep-alive comments on idle gaps. Dropping the returned stream drops
/// the upstream receiver, which cancels the upstream request.
pub fn passthrough(mut upstream: mpsc::Receiver<Bytes>) -> ReceiverStream<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        loop {
            let chunk = tokio::time::timeout(KEEPALIVE_INTERVAL, upstream.recv()).await;
            match chunk {
                Ok(Some(chunk)) => {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(_) => {
                    if tx
                        .send(Bytes::from(sse::encode_keepalive()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    });
    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_tags_are_stripped() {
        assert_eq!(
            strip_thinking_tags("<think>plan</think>hello <thinking>x</thinking>world"),
            "hello world"
        );
        assert_eq!(strip_thinking_tags("plain"), "plain");
        assert_eq!(strip_thinking_tags("pre<think>unclosed"), "pre");
    }

    fn frame_data(frame: &str) -> Value {
        let data = frame
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn chat_synthesis_order_and_finish_reason() {
        let body = serde_json::json!({
            "id": "chatcmpl-1",
            "created": 5,
            "model": "m",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "<think>hmm</think>hi",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let frames = synthesis_frames(EntryEndpoint::ChatCompletions, &body);

        let first = frame_data(&frames[0]);
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");

        let content = frame_data(&frames[1]);
        assert_eq!(content["choices"][0]["delta"]["content"], "hi");

        let tool_head = frame_data(&frames[2]);
        assert_eq!(
            tool_head["choices"][0]["delta"]["tool_calls"][0]["function"]["name"],
            "lookup"
        );
        assert_eq!(
            tool_head["choices"][0]["delta"]["tool_calls"][0]["id"],
            "call_1"
        );

        let args = frame_data(&frames[3]);
        assert_eq!(
            args["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"],
            "{\"q\":\"x\"}"
        );

        let last = frame_data(frames.last().unwrap());
        assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(last["choices"][0]["delta"], serde_json::json!({}));
    }

    #[test]
    fn responses_synthesis_ends_with_response_completed() {
        let body = serde_json::json!({
            "id": "resp_1",
            "object": "response",
            "created_at": 9,
            "status": "completed",
            "model": "m",
            "output": [{
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": "hello"}]
            }]
        });
        let frames = synthesis_frames(EntryEndpoint::Responses, &body);
        let last = frames.last().unwrap();
        assert!(last.starts_with("event: response.completed\n"));
        let payload = frame_data(last);
        assert_eq!(payload["response"]["id"], "resp_1");
    }

    #[tokio::test]
    async fn synthesize_terminates_with_done() {
        use futures_util::StreamExt;
        let body = serde_json::json!({
            "id": "chatcmpl-2", "created": 0, "model": "m",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"},
                         "finish_reason": "stop"}]
        });
        let mut stream = synthesize(EntryEndpoint::ChatCompletions, body);
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(std::str::from_utf8(&chunk).unwrap());
        }
        assert!(collected.ends_with("data: [DONE]\n\n"));
        assert!(collected.contains("\"finish_reason\":\"stop\""));
    }
}
