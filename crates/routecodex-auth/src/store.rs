//! The credential store.
//!
//! One JSON file per (providerType, seq, alias) under
//! `<home>/.routecodex/auth/<providerType>-oauth-<seq>-<alias>.json`.
//! Refresh is serialized by a per-file async lock; a backup copy protects
//! the file across the refresh window so readers never observe torn state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use routecodex_common::{env, home};

use crate::CredentialError;
use crate::refresh::{RefreshError, TokenRefresher};
use crate::repair::{REASON_GENERIC, REASON_GOOGLE_VERIFY, ReauthSignals, RepairCooldowns};
use crate::token::{TokenRecord, evaluate_token_state, sanitize_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    ApiKey,
    OAuthAccess,
}

/// Read-only view handed to the transport layer. The secret is whatever
/// goes into the `Authorization` header after resolution.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub provider_type: String,
    pub alias: String,
    pub secret: String,
    pub kind: SecretKind,
    pub token_file: Option<PathBuf>,
}

pub struct CredentialStore {
    auth_dir: PathBuf,
    repair: RepairCooldowns,
    reauth: ReauthSignals,
    refresher: Arc<dyn TokenRefresher>,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl CredentialStore {
    pub fn new(home_dir: &str, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_dirs(
            home::auth_dir(home_dir),
            home::state_dir(home_dir),
            refresher,
        )
    }

    pub fn with_dirs(
        auth_dir: PathBuf,
        state_dir: PathBuf,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            auth_dir,
            repair: RepairCooldowns::new(&state_dir),
            reauth: ReauthSignals::new(&state_dir),
            refresher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Locate the token file for `(providerType, alias)`. For one alias
    /// the greatest `seq` wins; the `default` alias additionally falls
    /// back to the highest-seq file of any alias for that provider.
    pub fn find_token_file(&self, provider_type: &str, alias: &str) -> Option<PathBuf> {
        let prefix = format!("{provider_type}-oauth-");
        let entries = std::fs::read_dir(&self.auth_dir).ok()?;

        let mut exact: Option<(u64, PathBuf)> = None;
        let mut any: Option<(u64, PathBuf)> = None;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Some(rest) = stem.strip_prefix(&prefix) else {
                continue;
            };
            let Some((seq_text, file_alias)) = rest.split_once('-') else {
                continue;
            };
            let Ok(seq) = seq_text.parse::<u64>() else {
                continue;
            };
            let path = entry.path();
            if any.as_ref().is_none_or(|(best, _)| seq > *best) {
                any = Some((seq, path.clone()));
            }
            if file_alias == alias && exact.as_ref().is_none_or(|(best, _)| seq > *best) {
                exact = Some((seq, path));
            }
        }

        match (exact, alias) {
            (Some((_, path)), _) => Some(path),
            (None, "default") => any.map(|(_, path)| path),
            (None, _) => None,
        }
    }

    async fn read_record(
        &self,
        path: &Path,
        provider_type: &str,
    ) -> Result<TokenRecord, CredentialError> {
        let bytes = tokio::fs::read(path).await?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(TokenRecord::from_sanitized(sanitize_token(
            &value,
            provider_type,
        )))
    }

    /// Resolve a usable secret for `(providerType, alias)`, refreshing the
    /// backing token once if needed.
    pub async fn resolve(
        &self,
        provider_type: &str,
        alias: &str,
    ) -> Result<ResolvedCredential, CredentialError> {
        let Some(path) = self.find_token_file(provider_type, alias) else {
            if let Some(api_key) = env::provider_api_key_fallback(provider_type) {
                return Ok(ResolvedCredential {
                    provider_type: provider_type.to_string(),
                    alias: alias.to_string(),
                    secret: api_key,
                    kind: SecretKind::ApiKey,
                    token_file: None,
                });
            }
            return Err(CredentialError::NotFound {
                provider_type: provider_type.to_string(),
                alias: alias.to_string(),
            });
        };

        let lock = self.file_lock(&path).await;
        let _guard = lock.lock().await;

        let record = self.read_record(&path, provider_type).await?;
        let state = evaluate_token_state(&record, provider_type);
        if state.valid_access {
            return Ok(self.credential_from(provider_type, alias, &path, &record));
        }

        if record.no_refresh {
            return Err(CredentialError::Invalid {
                provider_type: provider_type.to_string(),
                alias: alias.to_string(),
                reason: "token is marked norefresh".to_string(),
            });
        }

        let cooldown_key = RepairCooldowns::key(provider_type, &path);
        if self.repair.in_cooldown(&cooldown_key) {
            return Err(CredentialError::RepairCoolingDown {
                provider_type: provider_type.to_string(),
                alias: alias.to_string(),
            });
        }

        let record = self
            .refresh_locked(provider_type, alias, &path, record)
            .await?;
        Ok(self.credential_from(provider_type, alias, &path, &record))
    }

    fn credential_from(
        &self,
        provider_type: &str,
        alias: &str,
        path: &Path,
        record: &TokenRecord,
    ) -> ResolvedCredential {
        // qwen dispatches with its stable api key; other OAuth providers
        // send the access token; plain key files send the key.
        let stable_key = record.api_key.as_deref().filter(|key| {
            !key.is_empty() && record.api_key != record.access_token
        });
        let (secret, kind) = match (provider_type, stable_key, &record.access_token) {
            ("qwen", Some(key), _) => (key.to_string(), SecretKind::ApiKey),
            (_, _, Some(token)) if !token.is_empty() => {
                (token.clone(), SecretKind::OAuthAccess)
            }
            (_, Some(key), _) => (key.to_string(), SecretKind::ApiKey),
            _ => (
                record.api_key.clone().unwrap_or_default(),
                SecretKind::ApiKey,
            ),
        };
        ResolvedCredential {
            provider_type: provider_type.to_string(),
            alias: alias.to_string(),
            secret,
            kind,
            token_file: Some(path.to_path_buf()),
        }
    }

    /// Refresh under the per-file lock: back up, exchange, write
    /// atomically, delete backup; restore from backup on any failure.
    async fn refresh_locked(
        &self,
        provider_type: &str,
        alias: &str,
        path: &Path,
        record: TokenRecord,
    ) -> Result<TokenRecord, CredentialError> {
        let backup = backup_path(path);
        tokio::fs::copy(path, &backup).await?;

        match self.refresher.refresh(provider_type, &record).await {
            Ok(outcome) => {
                let mut merged = record.raw.clone();
                for (key, value) in outcome.updated {
                    merged.insert(key, value);
                }
                let merged = sanitize_token(&Value::Object(merged), provider_type);
                if let Err(err) = write_atomic(path, &merged).await {
                    restore_backup(path, &backup).await;
                    return Err(err.into());
                }
                let _ = tokio::fs::remove_file(&backup).await;
                debug!(event = "oauth.refresh_ok", provider = %provider_type, alias = %alias);
                Ok(TokenRecord::from_sanitized(merged))
            }
            Err(err) => {
                restore_backup(path, &backup).await;
                let reason = repair_reason(provider_type);
                self.repair.record(provider_type, path, reason);
                warn!(
                    event = "oauth.refresh_failed",
                    provider = %provider_type,
                    alias = %alias,
                    error = %err
                );
                if matches!(err, RefreshError::ReauthRequired) {
                    if provider_type == "antigravity" {
                        self.reauth.signal(provider_type, alias, alias);
                    }
                    return Err(CredentialError::ReauthRequired {
                        provider_type: provider_type.to_string(),
                        alias: alias.to_string(),
                    });
                }
                Err(CredentialError::Invalid {
                    provider_type: provider_type.to_string(),
                    alias: alias.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }
}

fn repair_reason(provider_type: &str) -> &'static str {
    match provider_type {
        "gemini-cli" | "antigravity" => REASON_GOOGLE_VERIFY,
        _ => REASON_GENERIC,
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    PathBuf::from(format!("{}.{ts}.bak", path.display()))
}

async fn write_atomic(path: &Path, map: &Map<String, Value>) -> std::io::Result<()> {
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    let bytes = serde_json::to_vec_pretty(&Value::Object(map.clone()))
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn restore_backup(path: &Path, backup: &Path) {
    if tokio::fs::copy(backup, path).await.is_ok() {
        let _ = tokio::fs::remove_file(backup).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::RefreshOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingRefresher;

    #[async_trait]
    impl TokenRefresher for FailingRefresher {
        async fn refresh(
            &self,
            _provider_type: &str,
            _record: &TokenRecord,
        ) -> Result<RefreshOutcome, RefreshError> {
            Err(RefreshError::Http {
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    struct StaticRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for StaticRefresher {
        async fn refresh(
            &self,
            _provider_type: &str,
            _record: &TokenRecord,
        ) -> Result<RefreshOutcome, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut updated = Map::new();
            updated.insert("access_token".to_string(), Value::from("fresh-token"));
            updated.insert("expires_at".to_string(), Value::from(far_future_ms()));
            Ok(RefreshOutcome { updated })
        }
    }

    fn far_future_ms() -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp() + 86_400) * 1000
    }

    fn temp_store(tag: &str, refresher: Arc<dyn TokenRefresher>) -> (CredentialStore, PathBuf) {
        let root = std::env::temp_dir().join(format!("rcx-store-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let auth = root.join("auth");
        let state = root.join("state");
        std::fs::create_dir_all(&auth).unwrap();
        std::fs::create_dir_all(&state).unwrap();
        (
            CredentialStore::with_dirs(auth.clone(), state, refresher),
            auth,
        )
    }

    fn write_token(auth: &Path, name: &str, value: Value) -> PathBuf {
        let path = auth.join(name);
        std::fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn failed_refresh_restores_backup_and_records_cooldown() {
        let (store, auth) = temp_store("fail", Arc::new(FailingRefresher));
        let expired = serde_json::json!({
            "access_token": "old",
            "refresh_token": "rt",
            "expires_at": 1_000i64
        });
        let path = write_token(&auth, "qwen-oauth-1-default.json", expired);
        let before = std::fs::read(&path).unwrap();

        let err = store.resolve("qwen", "default").await.unwrap_err();
        assert_eq!(err.code(), "CREDENTIAL_INVALID");

        let after = std::fs::read(&path).unwrap();
        assert_eq!(before, after, "token file must be byte-identical");
        assert!(!path.with_extension("json.tmp").exists());

        // Second attempt is suppressed by the repair cooldown.
        let err = store.resolve("qwen", "default").await.unwrap_err();
        assert_eq!(err.code(), "CREDENTIAL_REPAIR_COOLDOWN");
    }

    #[tokio::test]
    async fn successful_refresh_rewrites_token_and_drops_backup() {
        let refresher = Arc::new(StaticRefresher {
            calls: AtomicUsize::new(0),
        });
        let (store, auth) = temp_store("ok", refresher.clone());
        let expired = serde_json::json!({
            "access_token": "old",
            "refresh_token": "rt",
            "expires_at": 1_000i64
        });
        let path = write_token(&auth, "iflow-oauth-2-default.json", expired);

        let cred = store.resolve("iflow", "default").await.unwrap();
        assert_eq!(cred.secret, "fresh-token");
        assert_eq!(cred.kind, SecretKind::OAuthAccess);

        let written: Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["access_token"], "fresh-token");
        assert_eq!(written["refresh_token"], "rt");

        let leftovers: Vec<_> = std::fs::read_dir(&auth)
            .unwrap()
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".bak"))
            .collect();
        assert!(leftovers.is_empty(), "backup must be deleted on success");
    }

    #[tokio::test]
    async fn valid_token_short_circuits_refresh() {
        let refresher = Arc::new(StaticRefresher {
            calls: AtomicUsize::new(0),
        });
        let (store, auth) = temp_store("valid", refresher.clone());
        write_token(
            &auth,
            "iflow-oauth-1-default.json",
            serde_json::json!({
                "access_token": "live",
                "expires_at": far_future_ms()
            }),
        );

        let cred = store.resolve("iflow", "default").await.unwrap();
        assert_eq!(cred.secret, "live");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn greatest_seq_wins_per_alias() {
        let (store, auth) = temp_store("seq", Arc::new(FailingRefresher));
        write_token(
            &auth,
            "qwen-oauth-1-team.json",
            serde_json::json!({"apiKey": "old-key", "access_token": "a"}),
        );
        write_token(
            &auth,
            "qwen-oauth-3-team.json",
            serde_json::json!({"apiKey": "new-key", "access_token": "a"}),
        );

        let cred = store.resolve("qwen", "team").await.unwrap();
        assert_eq!(cred.secret, "new-key");
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_env_key() {
        let (store, _auth) = temp_store("env", Arc::new(FailingRefresher));
        // Use a name unlikely to collide with the ambient environment.
        unsafe { std::env::set_var("LMSTUDIO_API_KEY", "lm-key") };
        let cred = store.resolve("lmstudio", "default").await.unwrap();
        assert_eq!(cred.secret, "lm-key");
        assert!(cred.token_file.is_none());
        unsafe { std::env::remove_var("LMSTUDIO_API_KEY") };
    }
}
