use super::{FamilyProfile, UserAgentInput};

pub const LMSTUDIO_DEFAULT_BASE_URL: &str = "http://127.0.0.1:1234";

/// LM Studio runs locally; the profile only pins a stable user-agent so
/// request logs in the desktop app stay legible.
pub struct LmstudioProfile;

impl FamilyProfile for LmstudioProfile {
    fn id(&self) -> &'static str {
        "lmstudio"
    }

    fn family(&self) -> &'static str {
        "lmstudio"
    }

    fn resolve_user_agent(&self, input: &UserAgentInput<'_>) -> Option<String> {
        Some(
            input
                .ua_from_config
                .unwrap_or(input.default_user_agent)
                .to_string(),
        )
    }
}
