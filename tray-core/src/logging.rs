use crate::config::LoggingConfig;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_FILE_NAME: &str = "tray-core.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Persistent daily log plus stderr.
pub fn init_file_and_stderr(log_dir: &Path, cfg: &LoggingConfig) -> anyhow::Result<()> {
  fs::create_dir_all(log_dir)?;
  cleanup_old_logs(log_dir, cfg.retention_days);

  // The appender swallows its own write failures; a broken log file never masks an operation error.
  let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
  let _ = FILE_GUARD.set(guard);

  let filter = tracing_subscriber::EnvFilter::try_new(&cfg.level)
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer)
    .with_target(true);

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(std::io::stderr)
    .with_target(false);

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| anyhow::anyhow!("install tracing subscriber: {e}"))?;

  Ok(())
}

fn cleanup_old_logs(log_dir: &Path, retention_days: u64) {
  if retention_days == 0 {
    return;
  }

  let cutoff = SystemTime::now()
    .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
    .unwrap_or(SystemTime::UNIX_EPOCH);

  let Ok(entries) = fs::read_dir(log_dir) else {
    return;
  };

  for entry in entries.flatten() {
    let path = entry.path();
    if !is_tray_log_file(&path) {
      continue;
    }

    let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
      continue;
    };
    if modified < cutoff {
      let _ = fs::remove_file(&path);
    }
  }
}

fn is_tray_log_file(path: &Path) -> bool {
  let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
    return false;
  };
  name == LOG_FILE_NAME || name.starts_with(&format!("{LOG_FILE_NAME}."))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_rotated_tray_logs_are_recognized() {
    assert!(is_tray_log_file(Path::new("logs/tray-core.log")));
    assert!(is_tray_log_file(Path::new("logs/tray-core.log.2026-01-01")));
    assert!(!is_tray_log_file(Path::new("logs/tray_errors.log")));
    assert!(!is_tray_log_file(Path::new("logs/config.toml")));
  }

  #[test]
  fn cleanup_keeps_fresh_and_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let fresh = dir.path().join("tray-core.log.2026-10-15");
    let foreign = dir.path().join("notes.txt");
    fs::write(&fresh, "x").unwrap();
    fs::write(&foreign, "y").unwrap();

    cleanup_old_logs(dir.path(), 1);
    assert!(fresh.exists());
    assert!(foreign.exists());
  }
}
