//! Process-wide tracing setup.
//!
//! Library code only emits `tracing` events. Binaries call [`init`] once at
//! start-up; repeated calls are no-ops so embedding applications can call it
//! defensively from several entry points.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::ConfigError;

/// Keeps the non-blocking file writer alive for the life of the process.
static LOG_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Install the global subscriber.
///
/// Human-readable output goes to stderr (stdout is reserved for the
/// coordination protocol). When `log_file` is set, JSON lines are written
/// there as well. `RUST_LOG` overrides `level`.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<(), ConfigError> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| ConfigError::Logging(format!("invalid log level '{level}': {e}")))?,
    };

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().ok_or_else(|| {
                ConfigError::Logging(format!("log file {} has no file name", path.display()))
            })?;
            std::fs::create_dir_all(dir)?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    // Someone else (a test harness, the host application) may already own the
    // global subscriber; that counts as initialized.
    let _ = LOG_GUARD.set(if installed.is_ok() { guard } else { None });
    Ok(())
}
