use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use routecodex_auth::{CredentialStore, HttpTokenRefresher};
use routecodex_codec::default_registry;
use routecodex_common::{GatewayConfigPatch, env, home};
use routecodex_core::{
    CompatRegistry, Engine, ErrorLog, RoutesConfig, SnapshotWriter, VirtualRouter,
    default_blueprint_set,
};
use routecodex_provider::{
    FamilyProfileRegistry, HttpTransport, RateLimitManager, TransportConfig, UpstreamExecutor,
};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // An explicit --log-level wins; at the default, RUST_LOG still applies.
    let filter = if args.log_level != "info" {
        tracing_subscriber::EnvFilter::new(&args.log_level)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut patch = GatewayConfigPatch::default();
    patch.overlay(GatewayConfigPatch {
        host: Some(args.host.clone()),
        port: Some(args.port),
        home: (!args.home.trim().is_empty()).then(|| args.home.clone()),
        request_timeout_secs: Some(args.request_timeout),
        proxy: args.proxy.clone(),
    });
    let gateway = patch.into_config()?;

    let routes: RoutesConfig = if args.config.trim().is_empty() {
        RoutesConfig::default()
    } else {
        let bytes = std::fs::read(&args.config)
            .with_context(|| format!("reading config {}", args.config))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing config {}", args.config))?
    };

    let rate_limits = Arc::new(RateLimitManager::default());
    let transport = HttpTransport::new(
        TransportConfig {
            request_timeout: Duration::from_secs(gateway.request_timeout_secs),
            proxy: gateway.proxy.clone(),
            ..TransportConfig::default()
        },
        rate_limits,
    )?;
    let transport: Arc<dyn UpstreamExecutor> = Arc::new(transport);

    let refresher = Arc::new(HttpTokenRefresher::new()?);
    let store = Arc::new(CredentialStore::new(&gateway.home, refresher));

    let codecs = Arc::new(default_registry());
    let mut compat = CompatRegistry::with_builtins(codecs.clone());
    let mut compat_dirs = env::compat_dirs();
    compat_dirs.push(home::compat_dir(&gateway.home).display().to_string());
    let aliases = compat
        .load_plugin_dirs(&compat_dirs)
        .map_err(|err| anyhow::anyhow!("loading compatibility plugins: {err}"))?;
    if aliases > 0 {
        tracing::info!(event = "compat.plugins_loaded", count = aliases);
    }

    let router = Arc::new(VirtualRouter::new(
        Arc::new(routes),
        store,
        transport,
        FamilyProfileRegistry::with_builtins(),
    ));

    let snapshots = Arc::new(SnapshotWriter::new(&gateway.home, env::snapshots_enabled()));
    let errors = Arc::new(ErrorLog::new(&gateway.home));

    let engine = Arc::new(Engine::new(
        default_blueprint_set(),
        codecs,
        Arc::new(compat),
        router,
        snapshots,
        errors,
    ));

    let app = routecodex_server::gateway_router(
        engine,
        Duration::from_secs(gateway.request_timeout_secs),
    );

    let bind = format!("{}:{}", gateway.host, gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(event = "server.listening", bind = %bind);
    axum::serve(listener, app).await?;
    Ok(())
}
