use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the embedding process.
///
/// Respects `RUST_LOG`; defaults to `info` when unset. Safe to call more
/// than once (subsequent calls are no-ops), so tests and embedding
/// applications can both invoke it unconditionally.
pub fn init_tracing(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let initialized = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if initialized {
        tracing::debug!(service_name, "tracing initialized");
    }
}
