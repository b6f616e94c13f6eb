use anyhow::Context;
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "ZAPRET_TRAY_HOME";
pub const LIVE_DIR_NAME: &str = "zapret-discord";
pub const SERVICE_SCRIPT_NAME: &str = "service.bat";

/// Data directory: `ZAPRET_TRAY_HOME` if set, otherwise the directory holding the executable.
pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(home) = std::env::var(HOME_ENV) {
    if !home.trim().is_empty() {
      return Ok(PathBuf::from(home));
    }
  }
  let exe = std::env::current_exe().context("resolve current executable")?;
  exe
    .parent()
    .map(Path::to_path_buf)
    .ok_or_else(|| anyhow::anyhow!("executable has no parent: {}", exe.display()))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn live_dir(base: &Path) -> PathBuf {
  base.join(LIVE_DIR_NAME)
}

pub fn bin_dir(live: &Path) -> PathBuf {
  live.join("bin")
}

pub fn service_script_path(live: &Path) -> PathBuf {
  live.join(SERVICE_SCRIPT_NAME)
}

pub fn marker_path(base: &Path) -> PathBuf {
  base.join("service-marker.toml")
}

pub fn update_state_path(base: &Path) -> PathBuf {
  base.join("update-state.toml")
}

pub fn staging_dir() -> PathBuf {
  std::env::temp_dir().join("zapret_update")
}

/// File name of the running executable, used to keep the merge from overwriting it.
pub fn running_exe_name() -> Option<String> {
  std::env::current_exe()
    .ok()?
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
}
