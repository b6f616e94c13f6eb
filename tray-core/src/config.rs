use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub logging: LoggingConfig,
  pub extract: ExtractConfig,
  pub service: ServiceConfig,
  pub update: UpdateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
  /// Value substituted for `%GameFilter%`.
  #[serde(default = "default_game_filter")]
  pub game_filter: String,
}

impl Default for ExtractConfig {
  fn default() -> Self {
    Self {
      game_filter: default_game_filter(),
    }
  }
}

fn default_game_filter() -> String {
  "12".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerBackend {
  Registry,
  File,
}

impl Default for MarkerBackend {
  fn default() -> Self {
    if cfg!(windows) {
      MarkerBackend::Registry
    } else {
      MarkerBackend::File
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
  #[serde(default = "default_service_name")]
  pub name: String,

  #[serde(default = "default_service_name")]
  pub display_name: String,

  #[serde(default = "default_service_description")]
  pub description: String,

  #[serde(default = "default_worker_exe")]
  pub worker_exe: String,

  #[serde(default = "default_driver_services")]
  pub driver_services: Vec<String>,

  #[serde(default = "default_marker_value")]
  pub marker_value: String,

  #[serde(default)]
  pub marker_backend: MarkerBackend,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: default_service_name(),
      display_name: default_service_name(),
      description: default_service_description(),
      worker_exe: default_worker_exe(),
      driver_services: default_driver_services(),
      marker_value: default_marker_value(),
      marker_backend: MarkerBackend::default(),
    }
  }
}

fn default_service_name() -> String {
  "zapret".to_string()
}

fn default_service_description() -> String {
  "Zapret DPI bypass software".to_string()
}

fn default_worker_exe() -> String {
  "winws.exe".to_string()
}

fn default_driver_services() -> Vec<String> {
  vec!["WinDivert".to_string(), "WinDivert14".to_string()]
}

fn default_marker_value() -> String {
  "zapret-discord-youtube".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
  #[serde(default = "default_true")]
  pub auto_check: bool,

  #[serde(default = "default_repo_url")]
  pub repo_url: String,

  #[serde(default = "default_branch")]
  pub branch: String,

  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,

  #[serde(default = "default_check_interval_hours")]
  pub check_interval_hours: u64,

  #[serde(default = "default_startup_delay_seconds")]
  pub startup_delay_seconds: u64,
}

impl Default for UpdateConfig {
  fn default() -> Self {
    Self {
      auto_check: true,
      repo_url: default_repo_url(),
      branch: default_branch(),
      timeout_seconds: default_timeout_seconds(),
      check_interval_hours: default_check_interval_hours(),
      startup_delay_seconds: default_startup_delay_seconds(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_repo_url() -> String {
  "https://github.com/Flowseal/zapret-discord-youtube".to_string()
}

fn default_branch() -> String {
  "main".to_string()
}

fn default_timeout_seconds() -> u64 {
  5 * 60
}

fn default_check_interval_hours() -> u64 {
  24
}

fn default_startup_delay_seconds() -> u64 {
  30
}

pub const ALLOWED_REPO_HOST: &str = "github.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub extract: Option<ExtractConfig>,

  #[serde(default)]
  pub service: Option<ServiceConfig>,

  #[serde(default)]
  pub update: Option<UpdateConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(e) = self.extract {
      cfg.extract = e;
    }
    if let Some(s) = self.service {
      cfg.service = s;
    }
    if let Some(u) = self.update {
      cfg.update = u;
    }

    // Left as written: the scheduler skips invalid settings, so fixing the URL re-enables checks.
    if let Some(reason) = validate_update_config(&cfg.update) {
      tracing::warn!(reason = %reason, "update config invalid; automatic checks disabled");
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none() || self.extract.is_none() || self.service.is_none() || self.update.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

pub fn load_or_default_readonly(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, false)
}

fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  if allow_writes {
    fs::create_dir_all(parent)?;
  }

  if !path.exists() {
    let cfg = Config::default();
    if allow_writes {
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
    } else {
      eprintln!(
        "zapret tray: config missing at {}; using defaults in read-only mode (--dry-run).",
        path.display()
      );
    }
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if allow_writes && upgrade {
        let backup = parent.join(format!("config.toml.bak-{}", unix_ts()));
        let _ = fs::copy(path, &backup);
        let _ = write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?);
        eprintln!(
          "zapret tray: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      } else if upgrade {
        eprintln!(
          "zapret tray: config at {} needs upgrade; proceeding without writing in --dry-run mode.",
          path.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      if allow_writes {
        let backup = parent.join(format!("config.toml.bad-{}", unix_ts()));
        let _ = fs::rename(path, &backup);
        write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
        eprintln!(
          "zapret tray: invalid config at {} (backed up to {}): {e}",
          path.display(),
          backup.display()
        );
      } else {
        eprintln!(
          "zapret tray: invalid config at {}; using defaults in read-only mode (--dry-run): {e}",
          path.display()
        );
      }
      Ok(cfg)
    }
  }
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    logging: Some(cfg.logging.clone()),
    extract: Some(cfg.extract.clone()),
    service: Some(cfg.service.clone()),
    update: Some(cfg.update.clone()),
  }
}

fn unix_ts() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

pub fn validate_update_config(cfg: &UpdateConfig) -> Option<String> {
  if cfg.timeout_seconds == 0 {
    return Some("timeout_seconds must be > 0".to_string());
  }
  if cfg.check_interval_hours == 0 {
    return Some("check_interval_hours must be > 0".to_string());
  }
  if cfg.branch.trim().is_empty() {
    return Some("branch must not be empty".to_string());
  }

  let Ok(url) = reqwest::Url::parse(&cfg.repo_url) else {
    return Some(format!("invalid repo URL: {}", cfg.repo_url));
  };
  if url.scheme() != "https" {
    return Some(format!("repo URL must use HTTPS: {}", cfg.repo_url));
  }
  if url.host_str() != Some(ALLOWED_REPO_HOST) {
    return Some(format!("repo host must be {ALLOWED_REPO_HOST}: {}", cfg.repo_url));
  }

  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_config_is_created_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let cfg = load_or_create_default(&path).unwrap();
    assert!(path.exists());
    assert_eq!(cfg.service.name, "zapret");
    assert_eq!(cfg.update.timeout_seconds, 300);

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("[service]"));
    assert!(raw.contains("[update]"));
  }

  #[test]
  fn partial_config_is_upgraded_with_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[extract]\ngame_filter = \"all\"\n").unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.extract.game_filter, "all");
    assert_eq!(cfg.logging.level, "info");

    let backups: Vec<_> = fs::read_dir(dir.path())
      .unwrap()
      .flatten()
      .filter(|e| e.file_name().to_string_lossy().starts_with("config.toml.bak-"))
      .collect();
    assert_eq!(backups.len(), 1);
    assert!(fs::read_to_string(&path).unwrap().contains("[logging]"));
  }

  #[test]
  fn unparsable_config_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "this is = = not toml").unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.service.driver_services, vec!["WinDivert", "WinDivert14"]);
    assert!(fs::read_dir(dir.path())
      .unwrap()
      .flatten()
      .any(|e| e.file_name().to_string_lossy().starts_with("config.toml.bad-")));
  }

  #[test]
  fn readonly_load_never_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let _ = load_or_default_readonly(&path).unwrap();
    assert!(!path.exists());
  }

  #[test]
  fn invalid_repo_is_not_persisted_as_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[update]\nrepo_url = \"http://example.com/repo\"\n").unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert!(cfg.update.auto_check);
    assert!(validate_update_config(&cfg.update).is_some());

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("[logging]"));
    assert!(written.contains("auto_check = true"));
  }

  #[test]
  fn default_update_config_is_valid() {
    assert_eq!(validate_update_config(&UpdateConfig::default()), None);
  }
}
