//! Credential lifecycle: on-disk token files, sanitization, validity
//! evaluation, refresh with backup/restore, and repair-cooldown state.
//!
//! This crate exclusively owns token file IO. Other components hold
//! read-only [`ResolvedCredential`] views and ask the store to refresh.

pub mod refresh;
pub mod repair;
pub mod store;
pub mod token;

pub use refresh::{HttpTokenRefresher, RefreshError, RefreshOutcome, TokenRefresher};
pub use repair::{RepairCooldowns, ReauthSignals};
pub use store::{CredentialStore, ResolvedCredential, SecretKind};
pub use token::{TokenRecord, TokenState, evaluate_token_state, sanitize_token};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential available for {provider_type}/{alias}")]
    NotFound { provider_type: String, alias: String },
    #[error("credential invalid for {provider_type}/{alias}: {reason}")]
    Invalid {
        provider_type: String,
        alias: String,
        reason: String,
    },
    #[error("interactive repair suppressed by cooldown for {provider_type}/{alias}")]
    RepairCoolingDown { provider_type: String, alias: String },
    #[error("re-authentication required for {provider_type}/{alias}")]
    ReauthRequired { provider_type: String, alias: String },
    #[error("token file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("token file is not valid json: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl CredentialError {
    /// Stable machine code surfaced in the gateway error body.
    pub fn code(&self) -> &'static str {
        match self {
            CredentialError::NotFound { .. } => "CREDENTIAL_NOT_FOUND",
            CredentialError::Invalid { .. } => "CREDENTIAL_INVALID",
            CredentialError::RepairCoolingDown { .. } => "CREDENTIAL_REPAIR_COOLDOWN",
            CredentialError::ReauthRequired { .. } => "CREDENTIAL_REAUTH_REQUIRED",
            CredentialError::Io(_) | CredentialError::Malformed(_) => "CREDENTIAL_IO",
        }
    }
}
