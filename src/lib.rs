//! Meander
//!
//! Runs many concurrent simulated browsing sessions against a fixed pool of
//! target sites. Each session drives a headless browser with human-like
//! scrolling, hovering, clicking and typing, persists its cookies/storage
//! between runs and writes a structured interaction log.

pub mod actions;
pub mod browsing;
pub mod config;
pub mod driver;
pub mod identity;
pub mod orchestrator;
pub mod persist;
pub mod worker;

use std::path::Path;

/// Initialize diagnostic logging: console output filtered by `RUST_LOG`, plus
/// a daily rolling file in the log directory when it is writable.
pub fn init_logging(log_dir: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if std::fs::create_dir_all(log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::daily(log_dir, "meander.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
