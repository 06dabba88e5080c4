//! End-to-end engine behavior over a scripted upstream: blueprint
//! resolution, dialect bridging, and response mirroring.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use routecodex_auth::{CredentialStore, RefreshError, RefreshOutcome, TokenRecord, TokenRefresher};
use routecodex_codec::default_registry;
use routecodex_core::compat::CompatRegistry;
use routecodex_core::config::RoutesConfig;
use routecodex_core::engine::{Engine, EngineOutcome, GatewayRequest};
use routecodex_core::pipeline::default_blueprint_set;
use routecodex_core::router::VirtualRouter;
use routecodex_core::{ErrorLog, SnapshotWriter};
use routecodex_protocol::EntryEndpoint;
use routecodex_provider::{
    AssembledRequest, CallSpec, FamilyProfileRegistry, ProviderCallError, ProviderPayload,
    RateLimitManager, UpstreamExecutor,
};

struct EchoExecutor {
    rate_limits: Arc<RateLimitManager>,
    response: Value,
    seen_bodies: Mutex<Vec<Value>>,
}

#[async_trait]
impl UpstreamExecutor for EchoExecutor {
    fn rate_limits(&self) -> &Arc<RateLimitManager> {
        &self.rate_limits
    }

    async fn execute(
        &self,
        _spec: &CallSpec,
        request: AssembledRequest,
    ) -> Result<ProviderPayload, ProviderCallError> {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        self.seen_bodies.lock().unwrap().push(body);
        Ok(ProviderPayload::Json {
            status: 200,
            headers: vec![
                ("content-length".to_string(), "123".to_string()),
                ("x-upstream".to_string(), "glm".to_string()),
            ],
            body: self.response.clone(),
        })
    }
}

struct NoRefresh;

#[async_trait]
impl TokenRefresher for NoRefresh {
    async fn refresh(
        &self,
        _provider_type: &str,
        _record: &TokenRecord,
    ) -> Result<RefreshOutcome, RefreshError> {
        Err(RefreshError::MissingRefreshToken)
    }
}

struct Fixture {
    engine: Engine,
    executor: Arc<EchoExecutor>,
    _root: std::path::PathBuf,
}

fn fixture(tag: &str, config: Value, upstream_response: Value, token_files: &[&str]) -> Fixture {
    let root = std::env::temp_dir().join(format!("rcx-engine-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    let auth = root.join("auth");
    std::fs::create_dir_all(&auth).unwrap();
    for name in token_files {
        std::fs::write(
            auth.join(name),
            serde_json::to_vec(&json!({"apiKey": "sk-test"})).unwrap(),
        )
        .unwrap();
    }

    let store = Arc::new(CredentialStore::with_dirs(
        auth,
        root.join("state"),
        Arc::new(NoRefresh),
    ));
    let config: RoutesConfig = serde_json::from_value(config).unwrap();
    let executor = Arc::new(EchoExecutor {
        rate_limits: Arc::new(RateLimitManager::default()),
        response: upstream_response,
        seen_bodies: Mutex::new(Vec::new()),
    });
    let codecs = Arc::new(default_registry());
    let compat = Arc::new(CompatRegistry::with_builtins(codecs.clone()));
    let router = Arc::new(VirtualRouter::new(
        Arc::new(config),
        store,
        executor.clone(),
        FamilyProfileRegistry::with_builtins(),
    ));
    let engine = Engine::new(
        default_blueprint_set(),
        codecs,
        compat,
        router,
        Arc::new(SnapshotWriter::disabled(root.to_str().unwrap())),
        Arc::new(ErrorLog::new(root.to_str().unwrap())),
    );
    Fixture {
        engine,
        executor,
        _root: root,
    }
}

fn chat_upstream_response() -> Value {
    json!({
        "id": "chatcmpl-up",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "hello there"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
    })
}

#[tokio::test]
async fn chat_happy_path_mirrors_upstream_and_strips_hop_headers() {
    let fx = fixture(
        "chat",
        json!({
            "routes": {},
            "providers": {"openai": {"provider_type": "openai"}}
        }),
        chat_upstream_response(),
        &["openai-oauth-1-default.json"],
    );

    let outcome = fx
        .engine
        .handle(GatewayRequest {
            endpoint: EntryEndpoint::ChatCompletions,
            body: json!({
                "model": "openai.gpt-4o",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": false
            }),
            stream: false,
            request_id: "req_chat".to_string(),
            inbound_user_agent: None,
        })
        .await
        .unwrap();

    let EngineOutcome::Buffered {
        body,
        headers,
        synthesize_stream,
    } = outcome
    else {
        panic!("expected buffered outcome");
    };
    assert!(!synthesize_stream);
    assert_eq!(body["id"], "chatcmpl-up");
    assert_eq!(body["choices"][0]["message"]["content"], "hello there");
    assert!(
        !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-length")),
        "hop headers must be stripped"
    );
    assert!(
        headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("x-upstream"))
    );

    // Upstream saw the bare model id, not the dot-form target.
    let seen = fx.executor.seen_bodies.lock().unwrap();
    assert_eq!(seen[0]["model"], "gpt-4o");
}

#[tokio::test]
async fn responses_entry_bridges_to_chat_and_back() {
    let fx = fixture(
        "bridge",
        json!({
            "routes": {},
            "providers": {"glm": {"provider_type": "glm"}}
        }),
        chat_upstream_response(),
        &["glm-oauth-1-default.json"],
    );

    let outcome = fx
        .engine
        .handle(GatewayRequest {
            endpoint: EntryEndpoint::Responses,
            body: json!({
                "model": "glm.glm-4.6",
                "input": [{"role": "user", "content": [{"type": "input_text", "text": "hello"}]}],
                "stream": true
            }),
            stream: true,
            request_id: "req_bridge".to_string(),
            inbound_user_agent: None,
        })
        .await
        .unwrap();

    let EngineOutcome::Buffered {
        body,
        synthesize_stream,
        ..
    } = outcome
    else {
        panic!("bridged streams must buffer upstream, then synthesize");
    };
    assert!(synthesize_stream);
    assert_eq!(body["object"], "response");
    assert_eq!(body["output"][0]["type"], "message");
    assert_eq!(body["output"][0]["content"][0]["text"], "hello there");

    // The upstream call was chat-shaped with the bare model id.
    let seen = fx.executor.seen_bodies.lock().unwrap();
    assert_eq!(seen[0]["model"], "glm-4.6");
    assert!(seen[0]["messages"].is_array());
    assert!(seen[0].get("input").is_none());
}

#[tokio::test]
async fn missing_model_is_a_client_error() {
    let fx = fixture(
        "no-model",
        json!({"routes": {}, "providers": {}}),
        json!({}),
        &[],
    );
    let err = fx
        .engine
        .handle(GatewayRequest {
            endpoint: EntryEndpoint::ChatCompletions,
            body: json!({"messages": []}),
            stream: false,
            request_id: "req_nomodel".to_string(),
            inbound_user_agent: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.status, 400);
    assert_eq!(err.code, "INVALID_REQUEST");
    assert_eq!(err.request_id, "req_nomodel");
}
