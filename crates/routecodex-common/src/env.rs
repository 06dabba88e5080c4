//! Recognized environment variables. All optional.

use std::time::Duration;

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn env_bool(name: &str) -> Option<bool> {
    env_nonempty(name).as_deref().and_then(parse_bool)
}

pub fn env_millis(name: &str) -> Option<Duration> {
    env_nonempty(name)?
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

/// `ROUTECODEX_SNAPSHOT` / `ROUTECODEX_SNAPSHOTS`; defaults on in debug builds.
pub fn snapshots_enabled() -> bool {
    env_bool("ROUTECODEX_SNAPSHOT")
        .or_else(|| env_bool("ROUTECODEX_SNAPSHOTS"))
        .unwrap_or(cfg!(debug_assertions))
}

pub fn verbose_errors() -> bool {
    env_bool("ROUTECODEX_VERBOSE_ERRORS").unwrap_or(false)
}

pub fn oauth_debug() -> bool {
    env_bool("ROUTECODEX_OAUTH_DEBUG").unwrap_or(false)
}

/// Suppression window for interactive OAuth repair after a failed refresh.
pub fn oauth_interactive_cooldown() -> Duration {
    env_millis("ROUTECODEX_OAUTH_INTERACTIVE_COOLDOWN_MS").unwrap_or(Duration::from_millis(60_000))
}

/// Longer window for Google verification flows.
pub fn oauth_google_verify_cooldown() -> Duration {
    env_millis("ROUTECODEX_OAUTH_GOOGLE_VERIFY_COOLDOWN_MS")
        .unwrap_or(Duration::from_millis(1_800_000))
}

/// `ROUTECODEX_COMPAT_DIRS` / `ROUTECODEX_COMPAT_PATH`, colon-separated.
pub fn compat_dirs() -> Vec<String> {
    let raw = env_nonempty("ROUTECODEX_COMPAT_DIRS").or_else(|| env_nonempty("ROUTECODEX_COMPAT_PATH"));
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split(':')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeepseekHeaderMode {
    Minimal,
    Standard,
    #[default]
    Default,
}

pub fn deepseek_header_mode() -> DeepseekHeaderMode {
    match env_nonempty("ROUTECODEX_DEEPSEEK_HEADER_MODE").as_deref() {
        Some("minimal") => DeepseekHeaderMode::Minimal,
        Some("standard") => DeepseekHeaderMode::Standard,
        _ => DeepseekHeaderMode::Default,
    }
}

/// Fallback API keys recognized per provider type when no token file applies.
pub fn provider_api_key_fallback(provider_type: &str) -> Option<String> {
    let names: &[&str] = match provider_type {
        "glm" => &["GLM_API_KEY", "ZHIPU_API_KEY", "BIGMODEL_API_KEY"],
        "openai" => &["OPENAI_API_KEY"],
        "qwen" => &["QWEN_API_KEY", "DASHSCOPE_API_KEY"],
        "iflow" => &["IFLOW_API_KEY"],
        "lmstudio" => &["LMSTUDIO_API_KEY"],
        "modelscope" => &["MODELSCOPE_API_KEY"],
        _ => &[],
    };
    names.iter().find_map(|name| env_nonempty(name))
}
