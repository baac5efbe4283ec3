use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a global fmt subscriber, honoring `RUST_LOG` and falling back to `default_filter`.
///
/// Safe to call more than once, later calls are ignored.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
