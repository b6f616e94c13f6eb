use crate::error::ServiceError;
use crate::extract::{self, Placeholders};
use crate::{paths, process, runtime};
use std::fs;
use std::path::{Path, PathBuf};

const SCRIPT_EXT: &str = "bat";
const SERVICE_SCRIPT_PREFIX: &str = "service";
const GENERAL_SCRIPT_PREFIX: &str = "general";

/// The variant scripts shipped in the live directory.
#[derive(Debug, Clone)]
pub struct VariantCatalog {
  live_dir: PathBuf,
  placeholders: Placeholders,
}

impl VariantCatalog {
  pub fn new(live_dir: &Path, game_filter: &str) -> Self {
    Self {
      live_dir: live_dir.to_path_buf(),
      placeholders: Placeholders::for_live_dir(live_dir, game_filter),
    }
  }

  pub fn live_dir(&self) -> &Path {
    &self.live_dir
  }

  /// Stems of every installable script, sorted. `service*.bat` is the entry script, not a variant.
  pub fn list(&self) -> Vec<String> {
    let mut out: Vec<String> = self
      .scripts()
      .into_iter()
      .filter(|name| !starts_with_ignore_case(name, SERVICE_SCRIPT_PREFIX))
      .filter_map(|name| stem(&name))
      .collect();
    out.sort();
    out
  }

  /// `general*.bat` file names, the scripts meant to be launched directly.
  pub fn list_general(&self) -> Vec<String> {
    let mut out: Vec<String> = self
      .scripts()
      .into_iter()
      .filter(|name| starts_with_ignore_case(name, GENERAL_SCRIPT_PREFIX))
      .collect();
    out.sort();
    out
  }

  pub fn exists(&self, name: &str) -> bool {
    self.script_path(name).map(|p| p.is_file()).unwrap_or(false)
  }

  pub fn read(&self, name: &str) -> Result<String, ServiceError> {
    let path = self.script_path(name)?;
    let bytes = fs::read(&path).map_err(|_| ServiceError::VariantMissing(name.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
  }

  /// Reads the variant and extracts the worker argument string from it.
  pub fn arguments(&self, name: &str) -> Result<String, ServiceError> {
    let script = self.read(name)?;
    let args = extract::extract_args(&script, &self.placeholders)?;
    tracing::debug!(variant = name, args = %args, "arguments extracted");
    Ok(args)
  }

  pub fn run(&self, name: &str) -> anyhow::Result<()> {
    let path = self.script_path(name)?;
    if runtime::is_dry_run() {
      tracing::warn!(script = %path.display(), "DRY-RUN: would launch variant script");
      return Ok(());
    }
    process::launch_detached(&path, &self.live_dir)
  }

  pub fn service_script(&self) -> PathBuf {
    paths::service_script_path(&self.live_dir)
  }

  /// Accepts `general_fake` or `general_fake.bat`; rejects anything that could leave the live
  /// directory.
  fn script_path(&self, name: &str) -> Result<PathBuf, ServiceError> {
    let name = name.trim();
    let stem = name
      .strip_suffix(".bat")
      .or_else(|| name.strip_suffix(".BAT"))
      .unwrap_or(name);
    if stem.is_empty() || stem.contains(['/', '\\', ':']) || stem.contains("..") {
      return Err(ServiceError::VariantMissing(name.to_string()));
    }
    Ok(self.live_dir.join(format!("{stem}.{SCRIPT_EXT}")))
  }

  fn scripts(&self) -> Vec<String> {
    let Ok(entries) = fs::read_dir(&self.live_dir) else {
      return Vec::new();
    };
    entries
      .flatten()
      .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
      .filter_map(|e| e.file_name().to_str().map(str::to_string))
      .filter(|name| {
        Path::new(name)
          .extension()
          .and_then(|x| x.to_str())
          .map(|x| x.eq_ignore_ascii_case(SCRIPT_EXT))
          .unwrap_or(false)
      })
      .collect()
  }
}

fn stem(file_name: &str) -> Option<String> {
  Path::new(file_name)
    .file_stem()
    .and_then(|s| s.to_str())
    .map(str::to_string)
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
  s.len() >= prefix.len()
    && s.is_char_boundary(prefix.len())
    && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}
