//! The virtual router: multiplexes a logical route over an ordered list
//! of `(provider, model, credential)` targets with pre-flight cooldown
//! and credential checks, and failover on retryable upstream errors.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use routecodex_auth::CredentialStore;
use routecodex_protocol::Protocol;
use routecodex_provider::{
    CallSpec, FamilyIdentity, FamilyProfileRegistry, ProviderPayload, RateLimitManager,
    UpstreamExecutor, assemble, provider_key,
};

use crate::config::{ProviderEntry, RoutesConfig, static_base_url};
use crate::error::{GatewayError, format_attempted};

/// One concrete dispatch target, parsed from
/// `<providerId>.<modelId>[.<credentialId>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub provider_id: String,
    pub model_id: String,
    pub credential_id: String,
}

impl RouteTarget {
    /// Two segments default the credential to `default`; three use the
    /// literal. A purely numeric trailing segment is treated as part of
    /// a dotted model version (`glm.glm-4.6`), not as a credential.
    pub fn parse(raw: &str) -> Option<Self> {
        let (provider_id, remainder) = raw.split_once('.')?;
        if provider_id.is_empty() || remainder.is_empty() {
            return None;
        }
        let (model_id, credential_id) = match remainder.rsplit_once('.') {
            Some((model, trailing))
                if !model.is_empty()
                    && !trailing.is_empty()
                    && !trailing.chars().all(|c| c.is_ascii_digit()) =>
            {
                (model.to_string(), trailing.to_string())
            }
            _ => (remainder.to_string(), "default".to_string()),
        };
        Some(Self {
            provider_id: provider_id.to_string(),
            model_id,
            credential_id,
        })
    }

    /// `providerId.credentialId`, as reported in `attempted` lists.
    pub fn attempt_label(&self) -> String {
        format!("{}.{}", self.provider_id, self.credential_id)
    }

    pub fn provider_key(&self) -> String {
        provider_key(&self.provider_id, &self.credential_id)
    }
}

#[derive(Debug, Clone)]
pub struct RouteSelection {
    pub route_name: String,
    pub targets: Vec<RouteTarget>,
}

/// Request-scoped inputs the router threads into the transport.
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub request_id: String,
    pub entry_endpoint: String,
    pub inbound_user_agent: Option<String>,
}

#[derive(Debug)]
pub struct DispatchSuccess {
    pub target: RouteTarget,
    pub provider_type: String,
    pub payload: ProviderPayload,
}

pub struct VirtualRouter {
    config: Arc<RoutesConfig>,
    store: Arc<CredentialStore>,
    transport: Arc<dyn UpstreamExecutor>,
    profiles: FamilyProfileRegistry,
}

impl VirtualRouter {
    pub fn new(
        config: Arc<RoutesConfig>,
        store: Arc<CredentialStore>,
        transport: Arc<dyn UpstreamExecutor>,
        profiles: FamilyProfileRegistry,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            profiles,
        }
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitManager> {
        self.transport.rate_limits()
    }

    /// Translate the request's `model` into an ordered candidate list.
    ///
    /// Dot-form with a known provider prefix forces a single target;
    /// otherwise the value names a route, falling back to the default
    /// route. Candidate order is user-declared; never reordered here.
    pub fn plan(&self, model: &str) -> Result<RouteSelection, GatewayError> {
        if let Some(target) = RouteTarget::parse(model)
            && self.config.providers.contains_key(&target.provider_id)
        {
            return Ok(RouteSelection {
                route_name: format!("target:{}", target.attempt_label()),
                targets: vec![target],
            });
        }

        let route_name = if self.config.routes.contains_key(model) {
            model.to_string()
        } else {
            self.config.default_route().to_string()
        };
        let Some(raw_targets) = self.config.routes.get(&route_name) else {
            return Err(GatewayError::configuration(
                crate::error::CODE_NO_PROVIDER_TARGET,
                format!("no route configured for {route_name}"),
            )
            .with_route(route_name));
        };

        let mut targets = Vec::with_capacity(raw_targets.len());
        for raw in raw_targets {
            let Some(target) = RouteTarget::parse(raw) else {
                return Err(GatewayError::configuration(
                    "INVALID_ROUTE_TARGET",
                    format!("malformed route target: {raw}"),
                )
                .with_route(route_name));
            };
            targets.push(target);
        }
        if targets.is_empty() {
            return Err(GatewayError::configuration(
                crate::error::CODE_NO_PROVIDER_TARGET,
                format!("route {route_name} has no targets"),
            )
            .with_route(route_name));
        }
        Ok(RouteSelection {
            route_name,
            targets,
        })
    }

    fn provider_entry(&self, target: &RouteTarget) -> Option<&ProviderEntry> {
        self.config.providers.get(&target.provider_id)
    }

    /// The dialect the selected route speaks upstream, taken from the
    /// first candidate. Mixed-protocol routes are a config error caught
    /// at load time, not here.
    pub fn provider_protocol(&self, selection: &RouteSelection) -> Protocol {
        selection
            .targets
            .first()
            .and_then(|target| self.provider_entry(target))
            .map(|entry| entry.protocol())
            .unwrap_or(Protocol::OpenAIChat)
    }

    pub fn provider_type(&self, selection: &RouteSelection) -> Option<String> {
        selection
            .targets
            .first()
            .and_then(|target| self.provider_entry(target))
            .map(|entry| entry.provider_type.clone())
    }

    /// Try candidates in order until one succeeds. Pre-flight skips
    /// (cooldown, unusable credential) and retryable failures move to the
    /// next candidate; a non-retryable failure is terminal.
    pub async fn dispatch(
        &self,
        selection: &RouteSelection,
        body: &Value,
        stream: bool,
        scope: &RequestScope,
    ) -> Result<DispatchSuccess, GatewayError> {
        let mut attempted: Vec<String> = Vec::new();
        let mut attempt_no: u32 = 0;

        for target in &selection.targets {
            attempted.push(target.attempt_label());
            let pkey = target.provider_key();

            let Some(entry) = self.provider_entry(target) else {
                warn!(
                    event = "router.unknown_provider",
                    request_id = %scope.request_id,
                    provider = %target.provider_id
                );
                continue;
            };

            let decision = self
                .transport
                .rate_limits()
                .should_throttle(Some(&pkey), Some(&target.model_id))
                .await;
            if decision.blocked {
                let cooldown =
                    RateLimitManager::build_throttle_error(Some(&pkey), Some(&target.model_id), &decision);
                debug!(
                    event = "router.cooldown_skip",
                    request_id = %scope.request_id,
                    target = %target.attempt_label(),
                    wait_ms = cooldown.retry_after_ms
                );
                continue;
            }

            let credential = match self
                .store
                .resolve(&entry.provider_type, &target.credential_id)
                .await
            {
                Ok(credential) => credential,
                Err(err) => {
                    warn!(
                        event = "router.credential_skip",
                        request_id = %scope.request_id,
                        target = %target.attempt_label(),
                        code = err.code(),
                        error = %err
                    );
                    continue;
                }
            };

            if attempt_no > 0 {
                tokio::time::sleep(backoff(attempt_no)).await;
            }
            attempt_no += 1;

            let mut body = body.clone();
            if let Some(object) = body.as_object_mut() {
                object.insert(
                    "model".to_string(),
                    Value::String(target.model_id.clone()),
                );
                // The upstream stream decision belongs to the engine, not
                // to whatever the client wrote in the payload.
                if stream {
                    object.insert("stream".to_string(), Value::Bool(true));
                } else {
                    object.remove("stream");
                }
            }

            let identity = FamilyIdentity {
                provider_family: entry.family.clone(),
                provider_id: target.provider_id.clone(),
                provider_key: pkey.clone(),
                provider_type: entry.provider_type.clone(),
                oauth_provider_id: entry.oauth_provider_id.clone(),
            };
            let chain = self.profiles.chain(&identity);

            let spec = CallSpec {
                provider_key: pkey.clone(),
                provider_type: entry.provider_type.clone(),
                model: Some(target.model_id.clone()),
                base_url_candidates: vec![
                    entry.base_url_override.clone(),
                    entry.base_url.clone(),
                    static_base_url(&entry.provider_type).map(str::to_string),
                ],
                endpoint_candidates: vec![entry.endpoint.clone()],
                auth_prefix: entry.auth_prefix.clone(),
                secret: credential.secret.clone(),
                body,
                stream,
                inbound_user_agent: scope.inbound_user_agent.clone(),
                ua_from_config: entry.user_agent.clone(),
            };

            let assembled = match assemble(&spec, &chain) {
                Ok(assembled) => assembled,
                Err(err) => {
                    return Err(GatewayError::configuration(
                        "MISSING_BASE_URL",
                        err.to_string(),
                    )
                    .with_request_id(scope.request_id.clone())
                    .with_route(selection.route_name.clone())
                    .with_provider(pkey, entry.provider_type.clone()));
                }
            };

            match self.transport.execute(&spec, assembled).await {
                Ok(payload) => {
                    return Ok(DispatchSuccess {
                        target: target.clone(),
                        provider_type: entry.provider_type.clone(),
                        payload,
                    });
                }
                Err(err) if err.retryable => {
                    warn!(
                        event = "router.failover",
                        request_id = %scope.request_id,
                        target = %target.attempt_label(),
                        status = err.status,
                        code = %err.code
                    );
                    continue;
                }
                Err(err) => {
                    return Err(GatewayError::from_provider(&err)
                        .with_request_id(scope.request_id.clone())
                        .with_route(selection.route_name.clone())
                        .with_provider(pkey, entry.provider_type.clone()));
                }
            }
        }

        warn!(
            event = "router.exhausted",
            request_id = %scope.request_id,
            route = %selection.route_name,
            attempted = %format_attempted(&attempted)
        );
        Err(GatewayError::all_unavailable(&selection.route_name, attempted)
            .with_request_id(scope.request_id.clone()))
    }
}

fn backoff(attempt_no: u32) -> Duration {
    let millis = 100u64.saturating_mul(1 << attempt_no.min(4));
    Duration::from_millis(millis.min(1_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_grammar() {
        let two = RouteTarget::parse("openai.gpt-4o").unwrap();
        assert_eq!(two.provider_id, "openai");
        assert_eq!(two.model_id, "gpt-4o");
        assert_eq!(two.credential_id, "default");

        let three = RouteTarget::parse("qwen.qwen-max.backup").unwrap();
        assert_eq!(three.model_id, "qwen-max");
        assert_eq!(three.credential_id, "backup");

        // A numeric trailing segment belongs to the model version.
        let dotted = RouteTarget::parse("glm.glm-4.6").unwrap();
        assert_eq!(dotted.model_id, "glm-4.6");
        assert_eq!(dotted.credential_id, "default");

        assert!(RouteTarget::parse("bare").is_none());
        assert!(RouteTarget::parse(".m").is_none());
    }

    #[test]
    fn backoff_is_bounded() {
        assert_eq!(backoff(1), Duration::from_millis(200));
        assert_eq!(backoff(10), Duration::from_millis(1_000));
    }
}
