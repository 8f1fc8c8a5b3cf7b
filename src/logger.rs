//! Logging setup for applications embedding bundle-schur
//!
//! The library itself only emits `tracing` events. Call one of these
//! functions once from a binary, test harness or benchmark to see them.

use tracing::Level;

/// Initialize the tracing subscriber with the default INFO level
///
/// The level can be overridden through the `RUST_LOG` environment variable.
///
/// # Example
/// ```no_run
/// use bundle_schur::init_logger;
///
/// init_logger();
/// tracing::info!("Application started");
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=debug cargo test
/// RUST_LOG=bundle_schur=trace cargo bench
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Safe to call more than once; only the first call installs a subscriber.
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}
