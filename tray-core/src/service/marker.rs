use crate::config::write_atomic;
use crate::error::ServiceError;
use crate::runtime::now_unix_ms;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One-slot store recording which variant produced the installed service.
pub trait MarkerStore {
  fn read(&self) -> Result<Option<String>, ServiceError>;
  fn write(&self, variant: &str) -> Result<(), ServiceError>;
  fn clear(&self) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MarkerFile {
  variant: String,
  #[serde(default)]
  installed_at_unix_ms: Option<u64>,
}

/// TOML file in the data directory.
#[derive(Debug, Clone)]
pub struct FileMarker {
  path: PathBuf,
}

impl FileMarker {
  pub fn new(path: &Path) -> Self {
    Self {
      path: path.to_path_buf(),
    }
  }
}

impl MarkerStore for FileMarker {
  fn read(&self) -> Result<Option<String>, ServiceError> {
    let raw = match fs::read_to_string(&self.path) {
      Ok(r) => r,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(ServiceError::Marker(format!("read {}: {e}", self.path.display()))),
    };
    let file: MarkerFile = toml::from_str(&raw)
      .map_err(|e| ServiceError::Marker(format!("parse {}: {e}", self.path.display())))?;
    let variant = file.variant.trim().to_string();
    Ok((!variant.is_empty()).then_some(variant))
  }

  fn write(&self, variant: &str) -> Result<(), ServiceError> {
    let file = MarkerFile {
      variant: variant.to_string(),
      installed_at_unix_ms: Some(now_unix_ms()),
    };
    let raw = toml::to_string_pretty(&file).map_err(|e| ServiceError::Marker(e.to_string()))?;
    write_atomic(&self.path, &raw).map_err(|e| ServiceError::Marker(e.to_string()))
  }

  fn clear(&self) -> Result<(), ServiceError> {
    match fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(ServiceError::Marker(format!("remove {}: {e}", self.path.display()))),
    }
  }
}

/// Registry value under the service's own key, read and written through `reg.exe`.
///
/// `sc delete` removes the key together with the value, which keeps the marker from outliving
/// the service in the common case.
#[derive(Debug, Clone)]
pub struct RegistryMarker {
  key: String,
  value: String,
}

impl RegistryMarker {
  pub fn for_service(service_name: &str, value: &str) -> Self {
    Self {
      key: format!("HKLM\\SYSTEM\\CurrentControlSet\\Services\\{service_name}"),
      value: value.to_string(),
    }
  }

  fn reg(&self, args: &[&str]) -> Result<String, String> {
    let mut cmd = std::process::Command::new("reg.exe");
    cmd.args(args);
    let out = crate::process::run_tool("reg", &mut cmd)?;
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
  }
}

impl MarkerStore for RegistryMarker {
  fn read(&self) -> Result<Option<String>, ServiceError> {
    match self.reg(&["query", &self.key, "/v", &self.value]) {
      Ok(stdout) => Ok(parse_reg_query(&stdout, &self.value)),
      Err(e) => {
        // Missing key or value both exit non-zero.
        tracing::debug!(key = %self.key, error = %e, "marker value not present");
        Ok(None)
      }
    }
  }

  fn write(&self, variant: &str) -> Result<(), ServiceError> {
    self
      .reg(&[
        "add", &self.key, "/v", &self.value, "/t", "REG_SZ", "/d", variant, "/f",
      ])
      .map(|_| ())
      .map_err(ServiceError::Marker)
  }

  fn clear(&self) -> Result<(), ServiceError> {
    if self.read()?.is_none() {
      return Ok(());
    }
    self
      .reg(&["delete", &self.key, "/v", &self.value, "/f"])
      .map(|_| ())
      .map_err(ServiceError::Marker)
  }
}

/// Pulls the data of `value` out of `reg query` output:
/// `    <value>    REG_SZ    <data>`.
pub fn parse_reg_query(stdout: &str, value: &str) -> Option<String> {
  for line in stdout.lines() {
    let trimmed = line.trim_start();
    let Some(rest) = trimmed.strip_prefix(value) else {
      continue;
    };
    let Some((_, data)) = rest.split_once("REG_SZ") else {
      continue;
    };
    let data = data.trim();
    if !data.is_empty() {
      return Some(data.to_string());
    }
  }
  None
}
