//! Upstream failure taxonomy.

use bytes::Bytes;
use serde_json::Value;

use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// Transport-level failure; no HTTP response was received.
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    /// Non-2xx HTTP response captured as bytes.
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
}

impl UpstreamFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamFailure::Http { status, .. } => Some(*status),
            UpstreamFailure::Transport { .. } => None,
        }
    }

    /// Whether the router should move on to the next candidate.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamFailure::Http { status, .. } => {
                *status == 429 || (500..600).contains(status)
            }
            UpstreamFailure::Transport { kind, .. } => matches!(
                kind,
                TransportErrorKind::Timeout
                    | TransportErrorKind::ReadTimeout
                    | TransportErrorKind::Connect
                    | TransportErrorKind::Dns
                    | TransportErrorKind::Tls
            ),
        }
    }
}

/// Structured terminal error for one provider call, carrying both the
/// gateway-level code and whatever the upstream reported.
#[derive(Debug, Clone)]
pub struct ProviderCallError {
    pub status: Option<u16>,
    pub code: String,
    pub upstream_code: Option<String>,
    pub upstream_message: Option<String>,
    pub details: Value,
    pub retryable: bool,
}

impl std::fmt::Display for ProviderCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.upstream_message, self.status) {
            (Some(message), Some(status)) => write!(f, "upstream {status}: {message}"),
            (None, Some(status)) => write!(f, "upstream returned {status}"),
            _ => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for ProviderCallError {}

impl ProviderCallError {
    pub fn from_failure(failure: &UpstreamFailure) -> Self {
        match failure {
            UpstreamFailure::Transport { kind, message } => Self {
                status: None,
                code: match kind {
                    TransportErrorKind::Timeout | TransportErrorKind::ReadTimeout => {
                        "TIMEOUT_ERROR".to_string()
                    }
                    _ => "TRANSPORT_ERROR".to_string(),
                },
                upstream_code: None,
                upstream_message: Some(message.clone()),
                details: serde_json::json!({"transport": kind}),
                retryable: failure.is_retryable(),
            },
            UpstreamFailure::Http { status, body, .. } => {
                let (upstream_code, upstream_message) = parse_upstream_error(body);
                Self {
                    status: Some(*status),
                    code: if *status == 429 {
                        "HTTP_429".to_string()
                    } else {
                        format!("HTTP_{status}")
                    },
                    upstream_code,
                    upstream_message,
                    details: Value::Null,
                    retryable: failure.is_retryable(),
                }
            }
        }
    }
}

/// Pull `error.code` / `error.message` out of a provider error body.
/// Tolerates `{message}` at the top level and non-JSON bodies.
pub fn parse_upstream_error(body: &[u8]) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        let text = String::from_utf8_lossy(body);
        let text = text.trim();
        return (
            None,
            (!text.is_empty()).then(|| text.chars().take(512).collect()),
        );
    };
    let error = value.get("error").unwrap_or(&value);
    let code = error
        .get("code")
        .map(|code| match code {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .or_else(|| {
            error
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let http_429 = UpstreamFailure::Http {
            status: 429,
            headers: Vec::new(),
            body: Bytes::new(),
        };
        assert!(http_429.is_retryable());

        let http_401 = UpstreamFailure::Http {
            status: 401,
            headers: Vec::new(),
            body: Bytes::new(),
        };
        assert!(!http_401.is_retryable());

        let timeout = UpstreamFailure::Transport {
            kind: TransportErrorKind::Timeout,
            message: "deadline".to_string(),
        };
        assert!(timeout.is_retryable());
    }

    #[test]
    fn upstream_error_body_parsing() {
        let (code, message) =
            parse_upstream_error(br#"{"error":{"code":"rate_limited","message":"slow down"}}"#);
        assert_eq!(code.as_deref(), Some("rate_limited"));
        assert_eq!(message.as_deref(), Some("slow down"));

        let (code, message) = parse_upstream_error(b"plain text failure");
        assert_eq!(code, None);
        assert_eq!(message.as_deref(), Some("plain text failure"));

        let (code, _) = parse_upstream_error(br#"{"error":{"code":429}}"#);
        assert_eq!(code.as_deref(), Some("429"));
    }
}
