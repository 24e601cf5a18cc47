//! Process-wide logging setup
//!
//! Events go to stdout and to `<dir>/running_logs.log`. The filter comes
//! from `RUST_LOG` when set, otherwise from the verbosity flags.

use std::fs;
use std::panic;
use std::path::Path;

use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "running_logs.log";

/// Filter directive for the given flags
pub fn default_directive(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "warn"
    } else if verbose {
        "debug,hyper=info,reqwest=info"
    } else {
        "info"
    }
}

/// Install the stdout and file sinks
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and closes the file writer. A second call leaves the first
/// subscriber in place.
pub fn init_logging(log_dir: &Path, verbose: bool, quiet: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stdout))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init();

    if installed.is_ok() {
        setup_panic_hook();
    }
    Ok(guard)
}

fn setup_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "no message"
        };
        error!("PANIC at {location}: {message}");
        previous(info);
    }));
}
