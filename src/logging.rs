//! Log output for the daemon.
//!
//! Records go to the systemd journal when one is reachable. Otherwise they
//! are written to `dmedia.log` under the log directory, rotated daily.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "DMEDIA_LOG";
const LOG_FILE: &str = "dmedia.log";

/// Keeps the file writer thread alive for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Filter from `DMEDIA_LOG`, e.g. `warn` or `dmedia::sync=debug`. Defaults
/// to `info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(target_os = "linux")]
fn init_journald() -> bool {
    match tracing_journald::layer() {
        Ok(journal) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journal)
                .init();
            true
        }
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn init_journald() -> bool {
    false
}

fn fallback_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dmedia")
        .join("logs")
}

/// Install the global subscriber. `log_dir` is only used without journald;
/// `None` means the local data directory.
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    if init_journald() {
        tracing::info!(backend = "journald", "Logging initialized");
        return Ok(());
    }

    let dir = log_dir.unwrap_or_else(fallback_log_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {:?}", dir))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, LOG_FILE));
    let _ = FILE_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
        .init();

    tracing::info!(backend = "file", dir = %dir.display(), "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_dir_is_under_dmedia() {
        let dir = fallback_log_dir();
        assert!(dir.ends_with("dmedia/logs"));
    }
}
