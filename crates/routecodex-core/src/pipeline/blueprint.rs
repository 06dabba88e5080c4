//! Pipeline blueprints: the immutable, per-endpoint node programs.

use serde_json::Value;

use routecodex_protocol::{EntryEndpoint, Protocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Request,
    Response,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Request => "request",
            Phase::Response => "response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Chat,
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingMode {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    SseInput,
    Input,
    Process,
    Compatibility,
    Provider,
    Output,
    SseOutput,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::SseInput => "sse-input",
            NodeKind::Input => "input",
            NodeKind::Process => "process",
            NodeKind::Compatibility => "compatibility",
            NodeKind::Provider => "provider",
            NodeKind::Output => "output",
            NodeKind::SseOutput => "sse-output",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub id: String,
    pub kind: NodeKind,
    /// Registry key of the node implementation.
    pub implementation: String,
    pub options: Value,
}

impl NodeDescriptor {
    pub fn new(id: &str, kind: NodeKind, implementation: &str, options: Value) -> Self {
        Self {
            id: id.to_string(),
            kind,
            implementation: implementation.to_string(),
            options,
        }
    }

    /// `<kind>:<id>`, used as the stage tag in wrapped node errors.
    pub fn stage(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone)]
pub struct Blueprint {
    pub id: String,
    pub phase: Phase,
    pub entry_endpoints: Vec<EntryEndpoint>,
    pub provider_protocols: Vec<Protocol>,
    pub process_mode: ProcessMode,
    pub streaming: StreamingMode,
    pub nodes: Vec<NodeDescriptor>,
}

/// All blueprints, built once at config load.
#[derive(Debug, Clone, Default)]
pub struct BlueprintSet {
    blueprints: Vec<Blueprint>,
}

impl BlueprintSet {
    pub fn new(blueprints: Vec<Blueprint>) -> Self {
        Self { blueprints }
    }

    /// Resolve the blueprint for an entry endpoint.
    ///
    /// Tie-break order: exact endpoint match, then a provider-protocol
    /// list containing the caller's protocol, then `chat` process mode
    /// over `passthrough`.
    pub fn resolve(
        &self,
        endpoint: EntryEndpoint,
        phase: Phase,
        provider_protocol: Protocol,
        process_mode: ProcessMode,
    ) -> Option<&Blueprint> {
        let mut candidates: Vec<&Blueprint> = self
            .blueprints
            .iter()
            .filter(|blueprint| {
                blueprint.phase == phase && blueprint.entry_endpoints.contains(&endpoint)
            })
            .collect();
        if candidates.len() > 1 {
            let matching_protocol: Vec<&Blueprint> = candidates
                .iter()
                .copied()
                .filter(|blueprint| blueprint.provider_protocols.contains(&provider_protocol))
                .collect();
            if !matching_protocol.is_empty() {
                candidates = matching_protocol;
            }
        }
        if candidates.len() > 1 {
            let exact_mode: Vec<&Blueprint> = candidates
                .iter()
                .copied()
                .filter(|blueprint| blueprint.process_mode == process_mode)
                .collect();
            if !exact_mode.is_empty() {
                candidates = exact_mode;
            } else if candidates
                .iter()
                .any(|blueprint| blueprint.process_mode == ProcessMode::Chat)
            {
                candidates.retain(|blueprint| blueprint.process_mode == ProcessMode::Chat);
            }
        }
        candidates.into_iter().next()
    }
}

/// The codec bridging an entry dialect to a provider dialect. `None`
/// means the pair is not expressible and blueprint construction fails.
pub fn codec_for(entry: Protocol, provider: Protocol) -> Option<&'static str> {
    match (entry, provider) {
        (a, b) if a == b => Some("passthrough"),
        (Protocol::OpenAIResponses, Protocol::OpenAIChat) => Some("responses-openai"),
        (Protocol::AnthropicMessages, Protocol::OpenAIChat) => Some("anthropic-openai"),
        (Protocol::OpenAIChat, Protocol::AnthropicMessages) => Some("chat-anthropic"),
        (Protocol::OpenAIChat, Protocol::OpenAIResponses) => Some("chat-responses"),
        _ => None,
    }
}

/// Default blueprint pair (request + response phase) for one entry
/// endpoint over one provider protocol.
pub fn default_blueprints(entry: EntryEndpoint, provider: Protocol) -> Option<Vec<Blueprint>> {
    let codec = codec_for(entry.protocol(), provider)?;
    let codec_options = serde_json::json!({"codec": codec});
    let suffix = format!(
        "{}-{}",
        entry.protocol().as_str(),
        provider.as_str()
    );

    let request = Blueprint {
        id: format!("{suffix}-request"),
        phase: Phase::Request,
        entry_endpoints: vec![entry],
        provider_protocols: vec![provider],
        process_mode: ProcessMode::Chat,
        streaming: StreamingMode::Auto,
        nodes: vec![
            NodeDescriptor::new("entry", NodeKind::Input, "openai-input", Value::Null),
            NodeDescriptor::new("switch", NodeKind::Process, "llmswitch", codec_options.clone()),
            NodeDescriptor::new(
                "compat",
                NodeKind::Compatibility,
                "compatibility",
                Value::Null,
            ),
            NodeDescriptor::new("upstream", NodeKind::Provider, "provider-http", Value::Null),
        ],
    };
    let response = Blueprint {
        id: format!("{suffix}-response"),
        phase: Phase::Response,
        entry_endpoints: vec![entry],
        provider_protocols: vec![provider],
        process_mode: ProcessMode::Chat,
        streaming: StreamingMode::Auto,
        nodes: vec![
            NodeDescriptor::new(
                "compat",
                NodeKind::Compatibility,
                "compatibility",
                Value::Null,
            ),
            NodeDescriptor::new("switch", NodeKind::Process, "llmswitch", codec_options),
            NodeDescriptor::new("finish", NodeKind::Output, "openai-output", Value::Null),
        ],
    };
    Some(vec![request, response])
}

/// The full default set: every entry endpoint over every provider
/// protocol with an expressible codec.
pub fn default_blueprint_set() -> BlueprintSet {
    let mut blueprints = Vec::new();
    for entry in [
        EntryEndpoint::ChatCompletions,
        EntryEndpoint::Responses,
        EntryEndpoint::Messages,
    ] {
        for provider in [
            Protocol::OpenAIChat,
            Protocol::OpenAIResponses,
            Protocol::AnthropicMessages,
        ] {
            if let Some(mut pair) = default_blueprints(entry, provider) {
                blueprints.append(&mut pair);
            }
        }
    }
    BlueprintSet::new(blueprints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_matching_protocol_then_chat_mode() {
        let set = default_blueprint_set();
        let blueprint = set
            .resolve(
                EntryEndpoint::Responses,
                Phase::Request,
                Protocol::OpenAIChat,
                ProcessMode::Chat,
            )
            .unwrap();
        assert!(blueprint.provider_protocols.contains(&Protocol::OpenAIChat));
        assert_eq!(blueprint.phase, Phase::Request);
        assert_eq!(blueprint.nodes.len(), 4);
        assert_eq!(blueprint.nodes[1].options["codec"], "responses-openai");
    }

    #[test]
    fn resolve_fails_for_unknown_combinations() {
        let set = BlueprintSet::new(Vec::new());
        assert!(
            set.resolve(
                EntryEndpoint::ChatCompletions,
                Phase::Request,
                Protocol::OpenAIChat,
                ProcessMode::Chat,
            )
            .is_none()
        );
    }

    #[test]
    fn codec_pairs() {
        assert_eq!(
            codec_for(Protocol::OpenAIChat, Protocol::OpenAIChat),
            Some("passthrough")
        );
        assert_eq!(
            codec_for(Protocol::AnthropicMessages, Protocol::OpenAIChat),
            Some("anthropic-openai")
        );
        assert_eq!(
            codec_for(Protocol::OpenAIResponses, Protocol::AnthropicMessages),
            None
        );
    }

    #[test]
    fn stage_tag_shape() {
        let descriptor =
            NodeDescriptor::new("upstream", NodeKind::Provider, "provider-http", Value::Null);
        assert_eq!(descriptor.stage(), "provider:upstream");
    }
}
