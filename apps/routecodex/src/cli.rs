use clap::Parser;

#[derive(Parser)]
#[command(name = "routecodex", about = "Local LLM gateway")]
pub(crate) struct Cli {
    #[arg(long, default_value = "127.0.0.1", env = "ROUTECODEX_HOST")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 5506, env = "ROUTECODEX_PORT")]
    pub(crate) port: u16,
    /// Path to the routes/providers config (JSON).
    #[arg(long, default_value = "", env = "ROUTECODEX_CONFIG")]
    pub(crate) config: String,
    /// State root; defaults to ROUTECODEX_HOME, then HOME.
    #[arg(long, default_value = "")]
    pub(crate) home: String,
    /// Log filter directive (e.g. `info`, `routecodex_core=debug`).
    #[arg(long, default_value = "info")]
    pub(crate) log_level: String,
    /// Per-request deadline in seconds.
    #[arg(long, default_value_t = 300)]
    pub(crate) request_timeout: u64,
    /// Outbound proxy for upstream egress.
    #[arg(long)]
    pub(crate) proxy: Option<String>,
}
