//! Token shapes and the boundary normalizer.
//!
//! Token files accumulated aliased field spellings over time
//! (`access_token` vs `AccessToken`, `api_key` vs `apiKey`, three ways of
//! writing the expiry). [`sanitize_token`] folds them into one canonical
//! map exactly once, at the file boundary; everything past the store works
//! on the canonical [`TokenRecord`].

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Milliseconds-epoch values start around 1973 when read as seconds; any
/// epoch below this is treated as seconds.
const MS_EPOCH_THRESHOLD: i64 = 100_000_000_000;

const EXPIRY_SKEW_MS: i64 = 60_000;
const NEAR_EXPIRY_SKEW_MS: i64 = 300_000;

/// Canonical in-memory view of one token file.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub access_token: Option<String>,
    pub api_key: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at_ms: Option<i64>,
    pub no_refresh: bool,
    /// The sanitized map, suitable for writing back verbatim.
    pub raw: Map<String, Value>,
}

impl TokenRecord {
    pub fn from_sanitized(raw: Map<String, Value>) -> Self {
        let get_str =
            |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        let no_refresh = raw
            .get("norefresh")
            .or_else(|| raw.get("noRefresh"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Self {
            access_token: get_str("access_token"),
            api_key: get_str("apiKey"),
            refresh_token: get_str("refresh_token"),
            expires_at_ms: raw.get("expires_at").and_then(Value::as_i64),
            no_refresh,
            raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenState {
    pub has_api_key: bool,
    pub has_access: bool,
    pub expires_at: Option<i64>,
    pub is_expired: bool,
    pub is_near_expiry: bool,
    pub valid_access: bool,
}

fn is_oauth_provider(provider_type: &str) -> bool {
    matches!(
        provider_type,
        "qwen" | "iflow" | "gemini-cli" | "antigravity"
    )
}

/// Normalize a raw token value into the canonical map. Idempotent:
/// sanitizing an already-sanitized map returns it unchanged.
pub fn sanitize_token(value: &Value, provider_type: &str) -> Map<String, Value> {
    let Value::Object(source) = value else {
        return Map::new();
    };

    let mut out = source.clone();

    // gemini-cli family nests the live token under `token{}` with account
    // metadata as siblings.
    if matches!(provider_type, "gemini-cli" | "antigravity")
        && let Some(Value::Object(inner)) = out.get("token").cloned()
    {
        let siblings = [
            "project_id",
            "projects",
            "disabled",
            "disabled_reason",
            "protected_models",
            "email",
        ];
        let mut unwrapped = inner;
        for key in siblings {
            if let Some(value) = out.get(key)
                && !unwrapped.contains_key(key)
            {
                unwrapped.insert(key.to_string(), value.clone());
            }
        }
        out = unwrapped;
    }

    // Prefer `access_token` over `AccessToken`.
    if !out.contains_key("access_token")
        && let Some(value) = out.remove("AccessToken")
    {
        out.insert("access_token".to_string(), value);
    } else {
        out.remove("AccessToken");
    }

    // Hoist `api_key` to `apiKey`.
    if let Some(value) = out.remove("api_key")
        && !out.contains_key("apiKey")
    {
        out.insert("apiKey".to_string(), value);
    }

    // Fold the expiry spellings into `expires_at`, normalized to ms epoch.
    let expiry = out
        .get("expires_at")
        .or_else(|| out.get("expired"))
        .or_else(|| out.get("expiry_date"))
        .cloned();
    out.remove("expired");
    out.remove("expiry_date");
    match expiry.as_ref().and_then(normalize_expiry_ms) {
        Some(ms) => {
            out.insert("expires_at".to_string(), Value::from(ms));
        }
        None => {
            out.remove("expires_at");
        }
    }

    out
}

fn normalize_expiry_ms(value: &Value) -> Option<i64> {
    let epoch = match value {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f as i64))?,
        Value::String(text) => {
            let text = text.trim();
            if let Ok(number) = text.parse::<i64>() {
                number
            } else if let Ok(parsed) = OffsetDateTime::parse(text, &Rfc3339) {
                return Some((parsed.unix_timestamp_nanos() / 1_000_000) as i64);
            } else {
                return None;
            }
        }
        _ => return None,
    };
    if epoch <= 0 {
        return None;
    }
    Some(if epoch < MS_EPOCH_THRESHOLD {
        epoch * 1000
    } else {
        epoch
    })
}

/// Derive validity from a canonical record.
///
/// qwen: a *stable* api key (distinct from the access token) bypasses
/// expiry. Other OAuth providers gate on a non-expired access token; a
/// stored api key never bypasses refresh there. Plain API-key providers
/// are valid whenever a key is present.
pub fn evaluate_token_state(record: &TokenRecord, provider_type: &str) -> TokenState {
    let now_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    let has_api_key = record.api_key.as_deref().is_some_and(|key| !key.is_empty());
    let has_access = record
        .access_token
        .as_deref()
        .is_some_and(|token| !token.is_empty());
    let is_expired = record
        .expires_at_ms
        .is_some_and(|at| now_ms >= at - EXPIRY_SKEW_MS);
    let is_near_expiry = record
        .expires_at_ms
        .is_some_and(|at| now_ms >= at - NEAR_EXPIRY_SKEW_MS);

    let stable_api_key = has_api_key && record.api_key != record.access_token;
    let valid_access = if provider_type == "qwen" && stable_api_key {
        true
    } else if is_oauth_provider(provider_type) {
        has_access && !is_expired
    } else {
        has_api_key || (has_access && !is_expired)
    };

    TokenState {
        has_api_key,
        has_access,
        expires_at: record.expires_at_ms,
        is_expired,
        is_near_expiry,
        valid_access,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(value: Value, provider: &str) -> Map<String, Value> {
        sanitize_token(&value, provider)
    }

    #[test]
    fn sanitize_is_idempotent() {
        let raw = serde_json::json!({
            "AccessToken": "at-1",
            "api_key": "key-1",
            "expired": 1_700_000_000u64,
            "refresh_token": "rt-1"
        });
        let once = sanitize(raw, "iflow");
        let twice = sanitize_token(&Value::Object(once.clone()), "iflow");
        assert_eq!(once, twice);
        assert_eq!(once.get("access_token"), Some(&Value::from("at-1")));
        assert_eq!(once.get("apiKey"), Some(&Value::from("key-1")));
        assert_eq!(once.get("expires_at"), Some(&Value::from(1_700_000_000_000i64)));
        assert!(!once.contains_key("AccessToken"));
        assert!(!once.contains_key("api_key"));
        assert!(!once.contains_key("expired"));
    }

    #[test]
    fn access_token_wins_over_alias() {
        let map = sanitize(
            serde_json::json!({"access_token": "real", "AccessToken": "stale"}),
            "qwen",
        );
        assert_eq!(map.get("access_token"), Some(&Value::from("real")));
        assert!(!map.contains_key("AccessToken"));
    }

    #[test]
    fn expiry_accepts_all_documented_shapes() {
        for (input, expected) in [
            (Value::from(1_700_000_000i64), 1_700_000_000_000i64),
            (Value::from(1_700_000_000_000i64), 1_700_000_000_000i64),
            (Value::from("1700000000"), 1_700_000_000_000i64),
            (Value::from("2023-11-14T22:13:20Z"), 1_700_000_000_000i64),
        ] {
            assert_eq!(normalize_expiry_ms(&input), Some(expected), "input {input:?}");
        }
        assert_eq!(normalize_expiry_ms(&Value::from("not a date")), None);
    }

    #[test]
    fn gemini_cli_nested_token_is_unwrapped() {
        let map = sanitize(
            serde_json::json!({
                "token": {"access_token": "at", "refresh_token": "rt", "expiry_date": 1_700_000_000u64},
                "project_id": "proj-1",
                "email": "dev@example.com",
                "ignored_sibling": true
            }),
            "gemini-cli",
        );
        assert_eq!(map.get("access_token"), Some(&Value::from("at")));
        assert_eq!(map.get("project_id"), Some(&Value::from("proj-1")));
        assert_eq!(map.get("email"), Some(&Value::from("dev@example.com")));
        assert!(!map.contains_key("ignored_sibling"));
        assert!(!map.contains_key("token"));
    }

    fn record(value: Value, provider: &str) -> TokenRecord {
        TokenRecord::from_sanitized(sanitize_token(&value, provider))
    }

    #[test]
    fn qwen_stable_api_key_bypasses_expiry() {
        let expired = record(
            serde_json::json!({
                "access_token": "at",
                "apiKey": "stable-key",
                "expires_at": 1_000i64
            }),
            "qwen",
        );
        let state = evaluate_token_state(&expired, "qwen");
        assert!(state.is_expired);
        assert!(state.valid_access);

        // A key identical to the access token is not stable.
        let mirrored = record(
            serde_json::json!({
                "access_token": "same",
                "apiKey": "same",
                "expires_at": 1_000i64
            }),
            "qwen",
        );
        assert!(!evaluate_token_state(&mirrored, "qwen").valid_access);
    }

    #[test]
    fn iflow_api_key_does_not_bypass_expired_access() {
        let expired = record(
            serde_json::json!({
                "access_token": "at",
                "apiKey": "some-key",
                "expires_at": 1_000i64
            }),
            "iflow",
        );
        let state = evaluate_token_state(&expired, "iflow");
        assert!(state.has_api_key);
        assert!(!state.valid_access);
    }

    #[test]
    fn plain_api_key_provider_is_valid_without_expiry() {
        let token = record(serde_json::json!({"apiKey": "sk-x"}), "openai");
        let state = evaluate_token_state(&token, "openai");
        assert!(state.valid_access);
        assert!(!state.is_expired);
    }

    #[test]
    fn near_expiry_uses_wider_skew() {
        let now_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let token = record(
            serde_json::json!({"access_token": "at", "expires_at": now_ms + 120_000}),
            "iflow",
        );
        let state = evaluate_token_state(&token, "iflow");
        assert!(!state.is_expired);
        assert!(state.is_near_expiry);
        assert!(state.valid_access);
    }
}
