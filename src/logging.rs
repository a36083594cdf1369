//! Logging setup: console output plus optional daily-rolling files.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogConfig;

const LOG_FILE_PREFIX: &str = "cyberdl.log";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Keeps the file writer alive; drop it only when the program exits
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
///
/// Calling this twice is harmless: the second call leaves the first
/// subscriber in place.
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()));

    let Some(dir) = &config.dir else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init();
        return LogGuard { _file_guard: None };
    };

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create log directory {}: {e}", dir.display());
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init();
        return LogGuard { _file_guard: None };
    }

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    LogGuard {
        _file_guard: Some(guard),
    }
}
