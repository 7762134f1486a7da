use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a dual stdout+rolling-file `tracing` subscriber. The returned
/// [`WorkerGuard`] must be held for the process lifetime or buffered log
/// lines are dropped on exit.
pub fn init(logs_dir: &Path, debug: bool) -> WorkerGuard {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, "memscreen.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_directive = if debug { "memscreen=debug,info" } else { "info" };
    let mut filter = EnvFilter::try_from_env("MEMSCREEN_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    for noisy in ["hyper=error", "reqwest=warn", "sqlx=warn", "tower_http=info"] {
        filter = filter.add_directive(noisy.parse().expect("static directive"));
    }

    let stdout_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}
