//! Keeps the live directory in sync with the upstream bundle.

use crate::config::{validate_update_config, write_atomic, UpdateConfig};
use crate::error::UpdateError;
use crate::runtime::{self, now_unix_ms};
use crate::{paths, process};
use anyhow::Context;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

pub mod fetch;
pub mod merge;

pub use fetch::{BundleSource, HttpBundleSource};
pub use merge::MergeReport;

const NEW_VERSION_MARKER: &str = "New version available";
const ARCHIVE_FILE_NAME: &str = "bundle.zip";
const EXTRACT_DIR_NAME: &str = "extracted";
/// `service.bat` menu input: "update lists", then dismiss the pause prompt.
const UPDATE_LISTS_INPUT: &str = "8\n\n";

/// Outcome of the last check and apply, persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UpdateState {
  pub last_check_at_unix_ms: Option<u64>,
  pub last_check_result: Option<String>,
  pub new_version_available: Option<bool>,
  pub last_apply_at_unix_ms: Option<u64>,
  pub last_apply_result: Option<String>,
}

impl UpdateState {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let raw = match fs::read_to_string(path) {
      Ok(r) => r,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
      Err(e) => return Err(e).with_context(|| format!("read update state {}", path.display())),
    };
    toml::from_str(&raw).with_context(|| format!("parse update state {}", path.display()))
  }

  pub fn save(&self, path: &Path) -> anyhow::Result<()> {
    let raw = toml::to_string_pretty(self).context("serialize update state")?;
    write_atomic(path, &raw)
  }
}

pub struct UpdateReconciler {
  cfg: UpdateConfig,
  live_dir: PathBuf,
  staging_dir: PathBuf,
  state_path: PathBuf,
  exe_name: Option<String>,
  source: Box<dyn BundleSource>,
}

impl UpdateReconciler {
  pub fn new(cfg: &UpdateConfig, base: &Path, source: Box<dyn BundleSource>) -> Self {
    Self {
      cfg: cfg.clone(),
      live_dir: paths::live_dir(base),
      staging_dir: paths::staging_dir(),
      state_path: paths::update_state_path(base),
      exe_name: paths::running_exe_name(),
      source,
    }
  }

  pub fn with_staging_dir(mut self, staging: &Path) -> Self {
    self.staging_dir = staging.to_path_buf();
    self
  }

  pub fn with_exe_name(mut self, exe_name: Option<&str>) -> Self {
    self.exe_name = exe_name.map(str::to_string);
    self
  }

  pub fn live_dir(&self) -> &Path {
    &self.live_dir
  }

  pub fn state(&self) -> UpdateState {
    UpdateState::load(&self.state_path).unwrap_or_else(|e| {
      tracing::warn!(error = ?e, "unable to read update state; using empty state");
      UpdateState::default()
    })
  }

  /// Asks the bundle's own `service.bat` whether upstream has a newer release.
  pub fn check_remote_version(&self) -> anyhow::Result<bool> {
    let script = paths::service_script_path(&self.live_dir);
    if !script.is_file() {
      tracing::info!(script = %script.display(), "service script missing; skipping version check");
      return Ok(false);
    }

    let result = run_version_check(&script, &self.live_dir);
    self.record(|st| {
      st.last_check_at_unix_ms = Some(now_unix_ms());
      match &result {
        Ok(available) => {
          st.last_check_result = Some("ok".to_string());
          st.new_version_available = Some(*available);
        }
        Err(e) => st.last_check_result = Some(format!("error: {e:#}")),
      }
    });

    let available = result?;
    tracing::info!(available, "version check finished");
    Ok(available)
  }

  /// Downloads the bundle and copies it over the live directory. Files the bundle no longer ships
  /// are left in place; the installed service keeps its old arguments until re-installed.
  pub fn fetch_and_merge(&self) -> Result<MergeReport, UpdateError> {
    if runtime::is_dry_run() {
      tracing::warn!(
        url = %fetch::archive_url(&self.cfg),
        live_dir = %self.live_dir.display(),
        "DRY-RUN: would download bundle and merge it into live directory"
      );
      return Ok(MergeReport::default());
    }

    let result = self.fetch_and_merge_inner();
    self.record(|st| {
      st.last_apply_at_unix_ms = Some(now_unix_ms());
      st.last_apply_result = Some(match &result {
        Ok(r) => format!("ok: {} copied, {} skipped", r.copied, r.skipped),
        Err(e) => format!("error: {e}"),
      });
      if result.is_ok() {
        st.new_version_available = Some(false);
      }
    });

    match &result {
      Ok(r) => tracing::info!(copied = r.copied, skipped = r.skipped, "bundle merged"),
      Err(e) => tracing::error!(error = %e, "bundle update failed"),
    }
    result
  }

  fn fetch_and_merge_inner(&self) -> Result<MergeReport, UpdateError> {
    merge::prepare_staging(&self.staging_dir)?;

    let archive = self.staging_dir.join(ARCHIVE_FILE_NAME);
    self.source.fetch_to(&archive)?;

    let extracted = self.staging_dir.join(EXTRACT_DIR_NAME);
    merge::extract_archive(&archive, &extracted)?;
    let root = merge::locate_bundle_root(&extracted, &fetch::bundle_dir_name(&self.cfg))?;

    fs::create_dir_all(&self.live_dir).map_err(|e| UpdateError::merge_io(&self.live_dir, e))?;
    let report = merge::merge_tree(&root, &self.live_dir, self.exe_name.as_deref())?;

    if let Err(e) = fs::remove_dir_all(&self.staging_dir) {
      tracing::warn!(staging = %self.staging_dir.display(), error = %e, "failed to remove staging directory");
    }
    Ok(report)
  }

  /// First-run bootstrap: populates the live directory when `service.bat` is missing.
  /// Returns whether a download happened.
  pub fn ensure_installed(&self) -> Result<bool, UpdateError> {
    let script = paths::service_script_path(&self.live_dir);
    if script.is_file() {
      return Ok(false);
    }
    tracing::warn!(live_dir = %self.live_dir.display(), "live directory not populated; bootstrapping");
    self.fetch_and_merge()?;
    Ok(true)
  }

  /// Refreshes the host lists through the `service.bat` menu.
  pub fn update_lists(&self) -> anyhow::Result<()> {
    let script = paths::service_script_path(&self.live_dir);
    if !script.is_file() {
      anyhow::bail!("service script not found: {}", script.display());
    }
    if runtime::is_dry_run() {
      tracing::warn!(script = %script.display(), "DRY-RUN: would run list update");
      return Ok(());
    }

    let mut cmd = process::batch_command(&script, &[], &self.live_dir);
    process::hide_window(&mut cmd)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    let mut child = cmd
      .spawn()
      .with_context(|| format!("launch {}", script.display()))?;
    if let Some(mut stdin) = child.stdin.take() {
      stdin
        .write_all(UPDATE_LISTS_INPUT.as_bytes())
        .context("write menu selection")?;
    }
    let output = child.wait_with_output().context("wait for list update")?;
    if !output.status.success() {
      anyhow::bail!("list update exited with {}", output.status);
    }
    tracing::info!("host lists updated");
    Ok(())
  }

  fn record(&self, f: impl FnOnce(&mut UpdateState)) {
    let mut st = self.state();
    f(&mut st);
    if let Err(e) = st.save(&self.state_path) {
      tracing::warn!(error = ?e, "failed to persist update state");
    }
  }
}

fn run_version_check(script: &Path, live_dir: &Path) -> anyhow::Result<bool> {
  let mut cmd = process::batch_command(script, &["check_updates", "soft"], live_dir);
  process::hide_window(&mut cmd).stdin(Stdio::null());
  let output = cmd
    .output()
    .with_context(|| format!("run {} check_updates", script.display()))?;
  Ok(new_version_available(&String::from_utf8_lossy(&output.stdout)))
}

pub fn new_version_available(output: &str) -> bool {
  output.contains(NEW_VERSION_MARKER)
}

/// Decides when the periodic version check is due: once after the startup delay, then every
/// interval.
#[derive(Debug, Clone)]
pub struct UpdateScheduler {
  enabled: bool,
  interval_ms: u64,
  next_due_ms: u64,
}

impl UpdateScheduler {
  /// Inert when `auto_check` is off or the update settings are invalid.
  pub fn new(cfg: &UpdateConfig, started_at_ms: u64) -> Self {
    Self {
      enabled: cfg.auto_check && validate_update_config(cfg).is_none(),
      interval_ms: cfg.check_interval_hours.max(1).saturating_mul(3_600_000),
      next_due_ms: started_at_ms.saturating_add(cfg.startup_delay_seconds.saturating_mul(1_000)),
    }
  }

  /// True when a check should run now; advances the next due time.
  pub fn tick_at(&mut self, now_ms: u64) -> bool {
    if !self.enabled || now_ms < self.next_due_ms {
      return false;
    }
    self.next_due_ms = now_ms.saturating_add(self.interval_ms);
    true
  }

  pub fn next_due_ms(&self) -> Option<u64> {
    self.enabled.then_some(self.next_due_ms)
  }
}
