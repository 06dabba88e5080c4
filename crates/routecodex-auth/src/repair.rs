//! Interactive-repair suppression state.
//!
//! After a failed refresh, the operator may need to re-authenticate
//! interactively. To avoid hammering them (or Google's verification
//! flow), each failed `(providerType, tokenFile)` pair is recorded with a
//! TTL; within the TTL the store skips interactive re-auth and fails the
//! target so the router can move on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use routecodex_common::env;

const REPAIR_FILE: &str = "oauth-repair-cooldown.json";
const REAUTH_FILE: &str = "antigravity-reauth-required.json";

pub const REASON_GENERIC: &str = "generic";
pub const REASON_GOOGLE_VERIFY: &str = "google-verify";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairRecord {
    #[serde(rename = "providerType")]
    pub provider_type: String,
    #[serde(rename = "tokenFile")]
    pub token_file: String,
    pub reason: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepairFile {
    version: u32,
    #[serde(rename = "updatedAt")]
    updated_at: i64,
    records: BTreeMap<String, RepairRecord>,
}

impl Default for RepairFile {
    fn default() -> Self {
        Self {
            version: 1,
            updated_at: 0,
            records: BTreeMap::new(),
        }
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn cooldown_for(reason: &str) -> Duration {
    if reason == REASON_GOOGLE_VERIFY {
        env::oauth_google_verify_cooldown()
    } else {
        env::oauth_interactive_cooldown()
    }
}

/// `~/.routecodex/state/oauth-repair-cooldown.json`. All IO is
/// best-effort: a broken state file never fails a request.
#[derive(Debug, Clone)]
pub struct RepairCooldowns {
    path: PathBuf,
}

impl RepairCooldowns {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(REPAIR_FILE),
        }
    }

    pub fn key(provider_type: &str, token_file: &Path) -> String {
        format!("{provider_type}::{}", token_file.display())
    }

    fn load(&self) -> RepairFile {
        std::fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn save(&self, file: &RepairFile) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(bytes) = serde_json::to_vec_pretty(file) {
            let _ = std::fs::write(&self.path, bytes);
        }
    }

    /// Whether interactive repair for this key is still suppressed.
    pub fn in_cooldown(&self, key: &str) -> bool {
        let file = self.load();
        let Some(record) = file.records.get(key) else {
            return false;
        };
        let ttl = cooldown_for(&record.reason).as_millis() as i64;
        now_ms() < record.updated_at + ttl
    }

    pub fn record(&self, provider_type: &str, token_file: &Path, reason: &str) {
        let key = Self::key(provider_type, token_file);
        debug!(event = "oauth.repair_cooldown", key = %key, reason = %reason);
        let mut file = self.load();
        let now = now_ms();
        file.updated_at = now;
        file.records.insert(
            key,
            RepairRecord {
                provider_type: provider_type.to_string(),
                token_file: token_file.display().to_string(),
                reason: reason.to_string(),
                updated_at: now,
            },
        );
        self.save(&file);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReauthRecord {
    #[serde(rename = "providerType")]
    pub provider_type: String,
    pub alias: String,
    /// Alias suffix observed before and after the refresh that demanded
    /// re-authentication, so the repair tooling can follow renames.
    #[serde(rename = "suffixFrom", skip_serializing_if = "Option::is_none")]
    pub suffix_from: Option<String>,
    #[serde(rename = "suffixTo", skip_serializing_if = "Option::is_none")]
    pub suffix_to: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReauthFile {
    version: u32,
    #[serde(rename = "updatedAt")]
    updated_at: i64,
    records: BTreeMap<String, ReauthRecord>,
}

impl Default for ReauthFile {
    fn default() -> Self {
        Self {
            version: 1,
            updated_at: 0,
            records: BTreeMap::new(),
        }
    }
}

/// `~/.routecodex/state/antigravity-reauth-required.json`.
#[derive(Debug, Clone)]
pub struct ReauthSignals {
    path: PathBuf,
}

impl ReauthSignals {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(REAUTH_FILE),
        }
    }

    fn normalize_alias(alias: &str) -> String {
        alias.trim().to_ascii_lowercase()
    }

    fn split_suffix(alias: &str) -> Option<String> {
        alias
            .rsplit_once('-')
            .filter(|(_, suffix)| suffix.chars().all(|c| c.is_ascii_digit()))
            .map(|(_, suffix)| suffix.to_string())
    }

    pub fn signal(&self, provider_type: &str, previous_alias: &str, alias: &str) {
        let key = Self::normalize_alias(alias);
        let mut file: ReauthFile = std::fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        let now = now_ms();
        file.updated_at = now;
        file.records.insert(
            key,
            ReauthRecord {
                provider_type: provider_type.to_string(),
                alias: alias.to_string(),
                suffix_from: Self::split_suffix(previous_alias),
                suffix_to: Self::split_suffix(alias),
                updated_at: now,
            },
        );
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(bytes) = serde_json::to_vec_pretty(&file) {
            let _ = std::fs::write(&self.path, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_in_cooldown() {
        let dir = std::env::temp_dir().join(format!("rcx-repair-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let cooldowns = RepairCooldowns::new(&dir);
        let token_file = Path::new("/tmp/qwen-oauth-1-default.json");
        let key = RepairCooldowns::key("qwen", token_file);

        assert!(!cooldowns.in_cooldown(&key));
        cooldowns.record("qwen", token_file, REASON_GENERIC);
        assert!(cooldowns.in_cooldown(&key));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reauth_signal_tracks_suffix_transition() {
        assert_eq!(ReauthSignals::split_suffix("team-2"), Some("2".to_string()));
        assert_eq!(ReauthSignals::split_suffix("team"), None);
        assert_eq!(ReauthSignals::split_suffix("team-x"), None);
    }
}
