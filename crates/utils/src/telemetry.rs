use tracing_subscriber::EnvFilter;

/// Registers a global `tracing` subscriber. Safe to call more than once;
/// later calls are no-ops. Uses the `RUST_LOG` env var, defaulting to
/// "info". No OTLP pipeline — CareTask is an embedded library, not a
/// deployed service, so it carries no exporter dependency.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().compact().with_env_filter(env_filter).try_init();
}
