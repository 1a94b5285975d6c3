use tracing_subscriber::EnvFilter;

/// Installs a formatted tracing subscriber honouring `RUST_LOG`, falling
/// back to the given default directive. Safe to call more than once; later
/// calls are no-ops.
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
