//! Provider-specific token refresh.
//!
//! The store drives the protocol (locking, backup, restore); this module
//! only performs the refresh HTTP exchange and produces the fields to
//! merge back into the stored token.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, warn};

use routecodex_common::env;

use crate::token::TokenRecord;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

const QWEN_TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const QWEN_CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";

const IFLOW_TOKEN_URL: &str = "https://iflow.cn/oauth/token";
const IFLOW_USERINFO_URL: &str = "https://iflow.cn/api/oauth/getUserInfo";
const IFLOW_CLIENT_ID: &str = "10009311001";

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const GOOGLE_CLIENT_SECRET: &str = "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";

#[derive(Debug, Clone)]
pub enum RefreshError {
    MissingRefreshToken,
    Unsupported(String),
    Transport(String),
    Http { status: u16, body: String },
    /// The grant is gone for good; the operator must re-authenticate.
    ReauthRequired,
    Malformed(String),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshError::MissingRefreshToken => write!(f, "token has no refresh_token"),
            RefreshError::Unsupported(provider) => {
                write!(f, "refresh not supported for provider {provider}")
            }
            RefreshError::Transport(message) => write!(f, "refresh transport error: {message}"),
            RefreshError::Http { status, .. } => write!(f, "refresh endpoint returned {status}"),
            RefreshError::ReauthRequired => write!(f, "re-authentication required"),
            RefreshError::Malformed(message) => write!(f, "refresh response malformed: {message}"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Fields to merge into the stored token after a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub updated: Map<String, Value>,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        provider_type: &str,
        record: &TokenRecord,
    ) -> Result<RefreshOutcome, RefreshError>;
}

pub struct HttpTokenRefresher {
    client: wreq::Client,
}

impl HttpTokenRefresher {
    pub fn new() -> Result<Self, wreq::Error> {
        let client = wreq::Client::builder().timeout(REFRESH_TIMEOUT).build()?;
        Ok(Self { client })
    }

    async fn oauth_refresh(
        &self,
        token_url: &str,
        form: &[(&str, &str)],
    ) -> Result<Map<String, Value>, RefreshError> {
        let response = self
            .client
            .post(token_url)
            .form(form)
            .send()
            .await
            .map_err(|err| RefreshError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| RefreshError::Transport(err.to_string()))?;
        if !(200..300).contains(&status) {
            let text = String::from_utf8_lossy(&body).to_string();
            if text.contains("invalid_grant") {
                return Err(RefreshError::ReauthRequired);
            }
            return Err(RefreshError::Http { status, body: text });
        }

        let raw: Value = serde_json::from_slice(&body)
            .map_err(|err| RefreshError::Malformed(err.to_string()))?;
        let access_token = raw
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| RefreshError::Malformed("missing access_token".to_string()))?
            .to_string();

        let mut updated = Map::new();
        updated.insert("access_token".to_string(), Value::from(access_token));
        if let Some(refresh_token) = raw.get("refresh_token").and_then(Value::as_str) {
            updated.insert("refresh_token".to_string(), Value::from(refresh_token));
        }
        if let Some(expires_in) = raw.get("expires_in").and_then(Value::as_i64) {
            let now_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
            updated.insert(
                "expires_at".to_string(),
                Value::from(now_ms + expires_in * 1000),
            );
        }
        Ok(updated)
    }

    /// iFlow issues the actual inference key out of band; after a token
    /// refresh the key is re-fetched and merged into the stored record.
    async fn iflow_user_info(&self, access_token: &str) -> Result<Option<String>, RefreshError> {
        let url = format!("{IFLOW_USERINFO_URL}?accessToken={access_token}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| RefreshError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| RefreshError::Transport(err.to_string()))?;
        if !(200..300).contains(&status) {
            warn!(event = "oauth.iflow_userinfo", status = status);
            return Ok(None);
        }
        let raw: Value = serde_json::from_slice(&body)
            .map_err(|err| RefreshError::Malformed(err.to_string()))?;
        let api_key = raw
            .get("data")
            .and_then(|data| data.get("apiKey"))
            .or_else(|| raw.get("apiKey"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(api_key)
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(
        &self,
        provider_type: &str,
        record: &TokenRecord,
    ) -> Result<RefreshOutcome, RefreshError> {
        let refresh_token = record
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or(RefreshError::MissingRefreshToken)?;

        if env::oauth_debug() {
            debug!(event = "oauth.refresh", provider = %provider_type);
        }

        let mut updated = match provider_type {
            "qwen" => {
                self.oauth_refresh(
                    QWEN_TOKEN_URL,
                    &[
                        ("grant_type", "refresh_token"),
                        ("refresh_token", refresh_token),
                        ("client_id", QWEN_CLIENT_ID),
                    ],
                )
                .await?
            }
            "iflow" => {
                self.oauth_refresh(
                    IFLOW_TOKEN_URL,
                    &[
                        ("grant_type", "refresh_token"),
                        ("refresh_token", refresh_token),
                        ("client_id", IFLOW_CLIENT_ID),
                    ],
                )
                .await?
            }
            "gemini-cli" | "antigravity" => {
                self.oauth_refresh(
                    GOOGLE_TOKEN_URL,
                    &[
                        ("grant_type", "refresh_token"),
                        ("refresh_token", refresh_token),
                        ("client_id", GOOGLE_CLIENT_ID),
                        ("client_secret", GOOGLE_CLIENT_SECRET),
                    ],
                )
                .await?
            }
            other => return Err(RefreshError::Unsupported(other.to_string())),
        };

        if provider_type == "iflow" {
            let access_token = updated
                .get("access_token")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(access_token) = access_token {
                if let Some(api_key) = self.iflow_user_info(&access_token).await? {
                    updated.insert("apiKey".to_string(), Value::from(api_key));
                }
                updated.insert("type".to_string(), Value::from("iflow"));
            }
        }

        Ok(RefreshOutcome { updated })
    }
}
