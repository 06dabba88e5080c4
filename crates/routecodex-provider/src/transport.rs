//! Upstream HTTP transport.
//!
//! One client serves every provider. Assembly is pure (candidates in,
//! concrete URL/headers/body out) so it can be tested without IO; the
//! send path handles buffered and streaming bodies and keeps the
//! rate-limit buckets in sync with what the upstream returns.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ProviderCallError, TransportErrorKind, UpstreamFailure};
use crate::family::{
    BodyInput, EndpointInput, HeadersInput, ProfileChain, StreamHeadersInput, StreamMode,
    UserAgentInput,
};
use crate::headers::{Headers, header_set};
use crate::ratelimit::{RateLimitManager, parse_retry_after};

pub const DEFAULT_USER_AGENT: &str = concat!("RouteCodex/", env!("CARGO_PKG_VERSION"));
const DEFAULT_ENDPOINT: &str = "/chat/completions";
const DEFAULT_AUTH_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub proxy: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(30),
            proxy: None,
        }
    }
}

/// Everything needed to assemble one upstream call.
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub provider_key: String,
    pub provider_type: String,
    pub model: Option<String>,
    /// Base URL candidates in precedence order:
    /// runtime profile → override → config → static default.
    pub base_url_candidates: Vec<Option<String>>,
    /// Endpoint candidates in precedence order:
    /// runtime (relative only) → override → service default.
    pub endpoint_candidates: Vec<Option<String>>,
    pub auth_prefix: Option<String>,
    pub secret: String,
    pub body: Value,
    pub stream: bool,
    pub inbound_user_agent: Option<String>,
    pub ua_from_config: Option<String>,
}

#[derive(Debug)]
pub struct AssembledRequest {
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    MissingBaseUrl,
    /// A candidate was found but no candidate is an absolute http(s) URL.
    RelativeBaseUrl(String),
}

impl std::fmt::Display for AssembleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssembleError::MissingBaseUrl => write!(f, "no base url configured"),
            AssembleError::RelativeBaseUrl(url) => {
                write!(f, "base url must be absolute (http/https): {url}")
            }
        }
    }
}

impl std::error::Error for AssembleError {}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// First absolute candidate wins; else the first non-empty candidate is
/// taken and rejected for not being absolute.
pub fn compose_base_url(candidates: &[Option<String>]) -> Result<String, AssembleError> {
    let non_empty = || {
        candidates
            .iter()
            .flatten()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
    };
    if let Some(url) = non_empty().find(|url| is_absolute(url)) {
        return Ok(url.trim_end_matches('/').to_string());
    }
    match non_empty().next() {
        Some(url) => Err(AssembleError::RelativeBaseUrl(url.to_string())),
        None => Err(AssembleError::MissingBaseUrl),
    }
}

/// Relative candidates only; absolute runtime endpoints are ignored.
pub fn compose_endpoint(candidates: &[Option<String>]) -> String {
    let endpoint = candidates
        .iter()
        .flatten()
        .map(|endpoint| endpoint.trim())
        .filter(|endpoint| !endpoint.is_empty() && !is_absolute(endpoint))
        .next()
        .unwrap_or(DEFAULT_ENDPOINT);
    if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{endpoint}")
    }
}

/// Assemble a concrete request: compose URLs, build headers, run the
/// family hooks. Pure; no IO.
pub fn assemble(spec: &CallSpec, chain: &ProfileChain) -> Result<AssembledRequest, AssembleError> {
    let base_url = compose_base_url(&spec.base_url_candidates)?;

    let runtime_endpoint = spec
        .endpoint_candidates
        .first()
        .and_then(|endpoint| endpoint.as_deref());
    let endpoint = chain
        .resolve_endpoint(&EndpointInput {
            request: &spec.body,
            provider_type: &spec.provider_type,
            runtime_endpoint,
        })
        .unwrap_or_else(|| compose_endpoint(&spec.endpoint_candidates));
    let url = format!("{base_url}{endpoint}");

    let mut headers: Headers = Vec::new();
    header_set(&mut headers, "Content-Type", "application/json");
    header_set(&mut headers, "Accept", "application/json");
    let prefix = spec.auth_prefix.as_deref().unwrap_or(DEFAULT_AUTH_PREFIX);
    header_set(&mut headers, "Authorization", format!("{prefix}{}", spec.secret));

    let user_agent = chain
        .resolve_user_agent(&UserAgentInput {
            inbound_user_agent: spec.inbound_user_agent.as_deref(),
            ua_from_config: spec.ua_from_config.as_deref(),
            ua_from_service: None,
            default_user_agent: DEFAULT_USER_AGENT,
        })
        .or_else(|| spec.ua_from_config.clone())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    header_set(&mut headers, "User-Agent", user_agent);

    if let Some(rewritten) = chain.apply_request_headers(&HeadersInput {
        headers: &headers,
        request: &spec.body,
    }) {
        headers = rewritten;
    }
    if spec.stream
        && let Some(rewritten) = chain.apply_stream_mode_headers(&StreamHeadersInput {
            headers: &headers,
            mode: StreamMode::Streaming,
        })
    {
        headers = rewritten;
    }

    let body = chain
        .build_request_body(&BodyInput {
            default_body: &spec.body,
            request: &spec.body,
        })
        .unwrap_or_else(|| spec.body.clone());

    Ok(AssembledRequest {
        url,
        headers,
        body: Bytes::from(serde_json::to_vec(&body).unwrap_or_default()),
        stream: spec.stream,
    })
}

/// IO seam for the router: the real transport implements it, tests
/// substitute fakes.
#[async_trait::async_trait]
pub trait UpstreamExecutor: Send + Sync {
    fn rate_limits(&self) -> &Arc<RateLimitManager>;

    async fn execute(
        &self,
        spec: &CallSpec,
        request: AssembledRequest,
    ) -> Result<ProviderPayload, ProviderCallError>;
}

/// Response payload on the success path.
pub enum ProviderPayload {
    Json {
        status: u16,
        headers: Headers,
        body: Value,
    },
    Stream {
        status: u16,
        headers: Headers,
        rx: mpsc::Receiver<Bytes>,
    },
}

pub struct HttpTransport {
    client: wreq::Client,
    config: TransportConfig,
    rate_limits: Arc<RateLimitManager>,
}

impl HttpTransport {
    pub fn new(
        config: TransportConfig,
        rate_limits: Arc<RateLimitManager>,
    ) -> Result<Self, wreq::Error> {
        let mut builder = wreq::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout);
        if let Some(proxy) = config.proxy.as_deref() {
            builder = builder.proxy(wreq::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            config,
            rate_limits,
        })
    }

    /// Send the assembled call and reconcile the rate-limit bucket with
    /// the outcome. 429s are recorded *before* the failure surfaces so
    /// the router's next pre-flight already sees the cooldown.
    async fn execute_inner(
        &self,
        spec: &CallSpec,
        request: AssembledRequest,
    ) -> Result<ProviderPayload, ProviderCallError> {
        debug!(
            event = "transport.send",
            provider_key = %spec.provider_key,
            url = %request.url,
            stream = request.stream
        );
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(failure) => return Err(ProviderCallError::from_failure(&failure)),
        };

        let (status, headers, body) = match response {
            RawResponse::Buffered {
                status,
                headers,
                body,
            } => (status, headers, Some(body)),
            RawResponse::Stream {
                status,
                headers,
                rx,
            } => {
                self.rate_limits
                    .reset(Some(&spec.provider_key), spec.model.as_deref())
                    .await;
                return Ok(ProviderPayload::Stream {
                    status,
                    headers,
                    rx,
                });
            }
        };

        if !(200..300).contains(&status) {
            if status == 429 {
                let retry_after = parse_retry_after(&headers);
                self.rate_limits
                    .record_429(Some(&spec.provider_key), spec.model.as_deref(), retry_after)
                    .await;
            }
            let failure = UpstreamFailure::Http {
                status,
                headers,
                body: body.unwrap_or_default(),
            };
            return Err(ProviderCallError::from_failure(&failure));
        }

        self.rate_limits
            .reset(Some(&spec.provider_key), spec.model.as_deref())
            .await;

        let bytes = body.unwrap_or_default();
        let payload = serde_json::from_slice::<Value>(&bytes).unwrap_or_else(|_| {
            serde_json::json!({"raw": String::from_utf8_lossy(&bytes).to_string()})
        });
        Ok(ProviderPayload::Json {
            status,
            headers,
            body: payload,
        })
    }

    async fn send(&self, request: AssembledRequest) -> Result<RawResponse, UpstreamFailure> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(map_wreq_error)?;

        let status = response.status().as_u16();
        let headers = headers_from_wreq(response.headers());
        let ok = (200..300).contains(&status);

        if !ok || !request.stream {
            let body = response.bytes().await.map_err(map_wreq_error)?;
            return Ok(RawResponse::Buffered {
                status,
                headers,
                body,
            });
        }

        let idle = self.config.stream_idle_timeout;
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle, stream.next()).await;
                let Ok(item) = next else {
                    break;
                };
                let Some(item) = item else {
                    break;
                };
                let Ok(chunk) = item else {
                    break;
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        Ok(RawResponse::Stream {
            status,
            headers,
            rx,
        })
    }
}

#[async_trait::async_trait]
impl UpstreamExecutor for HttpTransport {
    fn rate_limits(&self) -> &Arc<RateLimitManager> {
        &self.rate_limits
    }

    async fn execute(
        &self,
        spec: &CallSpec,
        request: AssembledRequest,
    ) -> Result<ProviderPayload, ProviderCallError> {
        self.execute_inner(spec, request).await
    }
}

enum RawResponse {
    Buffered {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
    Stream {
        status: u16,
        headers: Headers,
        rx: mpsc::Receiver<Bytes>,
    },
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (name, value) in map {
        if let Ok(text) = value.to_str() {
            out.push((name.as_str().to_string(), text.to_string()));
        }
    }
    out
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    let kind = if err.is_timeout() {
        if lower.contains("read") || lower.contains("idle") {
            TransportErrorKind::ReadTimeout
        } else {
            TransportErrorKind::Timeout
        }
    } else if err.is_connect() {
        if lower.contains("dns") || lower.contains("resolve") {
            TransportErrorKind::Dns
        } else if lower.contains("tls") || lower.contains("ssl") {
            TransportErrorKind::Tls
        } else {
            TransportErrorKind::Connect
        }
    } else if lower.contains("tls") || lower.contains("ssl") {
        TransportErrorKind::Tls
    } else {
        TransportErrorKind::Other
    };
    UpstreamFailure::Transport { kind, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{FamilyIdentity, FamilyProfileRegistry};
    use crate::headers::header_get;

    #[test]
    fn base_url_first_absolute_wins() {
        let candidates = vec![
            Some("v1/internal".to_string()),
            Some("https://api.example.com/".to_string()),
            Some("http://fallback.example.com".to_string()),
        ];
        assert_eq!(
            compose_base_url(&candidates).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn base_url_rejects_relative_only_candidates() {
        let candidates = vec![None, Some("v1/internal".to_string())];
        assert_eq!(
            compose_base_url(&candidates),
            Err(AssembleError::RelativeBaseUrl("v1/internal".to_string()))
        );
        assert_eq!(compose_base_url(&[]), Err(AssembleError::MissingBaseUrl));
    }

    #[test]
    fn endpoint_skips_absolute_runtime_values() {
        let candidates = vec![
            Some("https://evil.example.com/steal".to_string()),
            Some("chat/retrieve".to_string()),
        ];
        assert_eq!(compose_endpoint(&candidates), "/chat/retrieve");
        assert_eq!(compose_endpoint(&[]), "/chat/completions");
    }

    fn spec(body: Value) -> CallSpec {
        CallSpec {
            provider_key: "glm.default".to_string(),
            provider_type: "glm".to_string(),
            model: Some("glm-4.6".to_string()),
            base_url_candidates: vec![Some("https://open.bigmodel.cn/api/paas/v4".to_string())],
            endpoint_candidates: vec![None],
            auth_prefix: None,
            secret: "sk-test".to_string(),
            body,
            stream: false,
            inbound_user_agent: None,
            ua_from_config: None,
        }
    }

    #[test]
    fn assemble_builds_auth_and_defaults() {
        let registry = FamilyProfileRegistry::with_builtins();
        let chain = registry.chain(&FamilyIdentity {
            provider_type: "glm".to_string(),
            ..Default::default()
        });
        let request = assemble(&spec(serde_json::json!({"model": "glm-4.6"})), &chain).unwrap();
        assert_eq!(
            request.url,
            "https://open.bigmodel.cn/api/paas/v4/chat/completions"
        );
        assert_eq!(
            header_get(&request.headers, "authorization"),
            Some("Bearer sk-test")
        );
        assert_eq!(
            header_get(&request.headers, "content-type"),
            Some("application/json")
        );
    }

    #[test]
    fn assemble_applies_glm_body_hook() {
        let registry = FamilyProfileRegistry::with_builtins();
        let chain = registry.chain(&FamilyIdentity {
            provider_type: "glm".to_string(),
            ..Default::default()
        });
        let body = serde_json::json!({
            "model": "glm-4.6",
            "messages": [{"role": "assistant", "content": null}]
        });
        let request = assemble(&spec(body), &chain).unwrap();
        let sent: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(sent["messages"][0]["content"], "");
    }

    #[test]
    fn assemble_routes_iflow_web_search() {
        let registry = FamilyProfileRegistry::with_builtins();
        let chain = registry.chain(&FamilyIdentity {
            provider_type: "iflow".to_string(),
            ..Default::default()
        });
        let mut call = spec(serde_json::json!({
            "metadata": {"iflowWebSearch": true},
            "data": {"query": "rust"}
        }));
        call.provider_type = "iflow".to_string();
        call.base_url_candidates = vec![Some("https://apis.iflow.cn/v1".to_string())];
        let request = assemble(&call, &chain).unwrap();
        assert_eq!(request.url, "https://apis.iflow.cn/v1/chat/retrieve");
        let sent: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(sent, serde_json::json!({"query": "rust"}));
    }
}
