use crate::error::ServiceError;
use std::path::PathBuf;

/// Parameters for `sc create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
  pub name: String,
  pub executable: PathBuf,
  pub arguments: String,
  pub display_name: String,
  pub description: String,
}

impl ServiceSpec {
  /// `binPath=` value: the worker quoted, followed by the already escaped arguments.
  pub fn bin_path(&self) -> String {
    let exe = self.executable.display();
    if self.arguments.is_empty() {
      format!("\\\"{exe}\\\"")
    } else {
      format!("\\\"{exe}\\\" {}", self.arguments)
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
  NotInstalled,
  Stopped,
  StartPending,
  StopPending,
  Running,
  Other,
}

impl RunState {
  pub fn is_installed(self) -> bool {
    self != RunState::NotInstalled
  }
}

/// Service subsystem operations. Each call completes (or fails) before it returns.
pub trait ServiceBackend {
  fn is_elevated(&self) -> bool;
  fn stop(&self, name: &str) -> Result<(), ServiceError>;
  fn delete(&self, name: &str) -> Result<(), ServiceError>;
  fn create(&self, spec: &ServiceSpec) -> Result<(), ServiceError>;
  fn set_description(&self, name: &str, description: &str) -> Result<(), ServiceError>;
  fn start(&self, name: &str) -> Result<(), ServiceError>;
  fn kill_process(&self, image_name: &str) -> Result<(), ServiceError>;
  fn query_state(&self, name: &str) -> Result<RunState, ServiceError>;
}

/// `sc.exe` / `taskkill.exe` child processes, with run state read from the Service Control
/// Manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScBackend;

#[cfg(windows)]
impl ServiceBackend for ScBackend {
  fn is_elevated(&self) -> bool {
    match super::elevation::is_elevated() {
      Ok(v) => v,
      Err(e) => {
        tracing::warn!(error = ?e, "unable to query token elevation; assuming not elevated");
        false
      }
    }
  }

  fn stop(&self, name: &str) -> Result<(), ServiceError> {
    sc::run(&["stop", name]).map_err(ServiceError::Command)
  }

  fn delete(&self, name: &str) -> Result<(), ServiceError> {
    sc::run(&["delete", name]).map_err(ServiceError::DeleteFailed)
  }

  fn create(&self, spec: &ServiceSpec) -> Result<(), ServiceError> {
    // sc parses `key= value` pairs itself; the binPath value must reach it with its inner quotes
    // intact, so the tail is passed raw.
    let raw = format!(
      "binPath= \"{}\" start= auto DisplayName= \"{}\"",
      spec.bin_path(),
      spec.display_name
    );
    sc::run_raw(&["create", &spec.name], &raw).map_err(ServiceError::CreateFailed)
  }

  fn set_description(&self, name: &str, description: &str) -> Result<(), ServiceError> {
    sc::run(&["description", name, description]).map_err(ServiceError::Command)
  }

  fn start(&self, name: &str) -> Result<(), ServiceError> {
    sc::run(&["start", name]).map_err(ServiceError::StartFailed)
  }

  fn kill_process(&self, image_name: &str) -> Result<(), ServiceError> {
    let mut cmd = std::process::Command::new("taskkill.exe");
    cmd.args(["/IM", image_name, "/F"]);
    crate::process::hide_window(&mut cmd);
    let output = cmd
      .output()
      .map_err(|e| ServiceError::Command(format!("taskkill: {e}")))?;
    let detail = format!(
      "{} {}",
      String::from_utf8_lossy(&output.stdout).trim(),
      String::from_utf8_lossy(&output.stderr).trim()
    );
    taskkill_outcome(image_name, output.status.code(), detail.trim())
  }

  fn query_state(&self, name: &str) -> Result<RunState, ServiceError> {
    scm::query_state(name)
  }
}

#[cfg(not(windows))]
impl ServiceBackend for ScBackend {
  fn is_elevated(&self) -> bool {
    false
  }

  fn stop(&self, _name: &str) -> Result<(), ServiceError> {
    Err(unsupported())
  }

  fn delete(&self, _name: &str) -> Result<(), ServiceError> {
    Err(unsupported())
  }

  fn create(&self, _spec: &ServiceSpec) -> Result<(), ServiceError> {
    Err(ServiceError::CreateFailed(
      "service management is only supported on Windows".to_string(),
    ))
  }

  fn set_description(&self, _name: &str, _description: &str) -> Result<(), ServiceError> {
    Err(unsupported())
  }

  fn start(&self, _name: &str) -> Result<(), ServiceError> {
    Err(unsupported())
  }

  fn kill_process(&self, _image_name: &str) -> Result<(), ServiceError> {
    Err(unsupported())
  }

  fn query_state(&self, _name: &str) -> Result<RunState, ServiceError> {
    Ok(RunState::NotInstalled)
  }
}

/// `taskkill` exits 128 when no process matches; its message text is localized.
const TASKKILL_NOT_FOUND: i32 = 128;

#[cfg_attr(not(windows), allow(dead_code))]
fn taskkill_outcome(image_name: &str, code: Option<i32>, detail: &str) -> Result<(), ServiceError> {
  match code {
    Some(0) => Ok(()),
    Some(TASKKILL_NOT_FOUND) => Err(ServiceError::Absent(image_name.to_string())),
    Some(c) => Err(ServiceError::Command(format!("taskkill failed (exit {c}): {detail}"))),
    None => Err(ServiceError::Command(format!("taskkill terminated: {detail}"))),
  }
}

#[cfg(not(windows))]
fn unsupported() -> ServiceError {
  ServiceError::Command("service management is only supported on Windows".to_string())
}

#[cfg(windows)]
mod sc {
  use std::os::windows::process::CommandExt;
  use std::process::Command;

  pub fn run(args: &[&str]) -> Result<(), String> {
    let mut cmd = Command::new("sc.exe");
    cmd.args(args);
    crate::process::run_tool("sc", &mut cmd).map(|_| ())
  }

  pub fn run_raw(args: &[&str], raw_tail: &str) -> Result<(), String> {
    let mut cmd = Command::new("sc.exe");
    cmd.args(args).raw_arg(raw_tail);
    crate::process::run_tool("sc", &mut cmd).map(|_| ())
  }
}

#[cfg(windows)]
mod scm {
  use super::RunState;
  use crate::error::ServiceError;
  use windows_service::service::{ServiceAccess, ServiceState};
  use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

  const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;

  pub fn query_state(name: &str) -> Result<RunState, ServiceError> {
    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
      .map_err(|e| ServiceError::Command(format!("connect to service manager: {e}")))?;

    let service = match manager.open_service(name, ServiceAccess::QUERY_STATUS) {
      Ok(s) => s,
      Err(windows_service::Error::Winapi(e))
        if e.raw_os_error() == Some(ERROR_SERVICE_DOES_NOT_EXIST) =>
      {
        return Ok(RunState::NotInstalled);
      }
      Err(e) => return Err(ServiceError::Command(format!("open service {name}: {e}"))),
    };

    let status = service
      .query_status()
      .map_err(|e| ServiceError::Command(format!("query service {name}: {e}")))?;

    Ok(match status.current_state {
      ServiceState::Stopped => RunState::Stopped,
      ServiceState::StartPending => RunState::StartPending,
      ServiceState::StopPending => RunState::StopPending,
      ServiceState::Running => RunState::Running,
      _ => RunState::Other,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bin_path_quotes_worker_and_appends_arguments() {
    let spec = ServiceSpec {
      name: "zapret".to_string(),
      executable: PathBuf::from("C:\\z\\bin\\winws.exe"),
      arguments: "--wf-tcp 80,443 --hostlist \\\"C:\\z\\lists\\list.txt\\\"".to_string(),
      display_name: "zapret".to_string(),
      description: "d".to_string(),
    };
    assert_eq!(
      spec.bin_path(),
      "\\\"C:\\z\\bin\\winws.exe\\\" --wf-tcp 80,443 --hostlist \\\"C:\\z\\lists\\list.txt\\\""
    );
  }

  #[test]
  fn taskkill_exit_code_decides_absence_in_any_language() {
    assert!(taskkill_outcome("winws.exe", Some(0), "").is_ok());

    let gone = taskkill_outcome("winws.exe", Some(128), "ОШИБКА: процесс \"winws.exe\" не найден.");
    assert!(matches!(&gone, Err(ServiceError::Absent(n)) if n == "winws.exe"));
    assert!(gone.unwrap_err().is_absent());

    let denied = taskkill_outcome("winws.exe", Some(1), "ERROR: Access is denied.").unwrap_err();
    assert!(!denied.is_absent());
    assert!(denied.to_string().contains("Access is denied"));
  }

  #[test]
  fn only_not_installed_counts_as_absent() {
    assert!(!RunState::NotInstalled.is_installed());
    assert!(RunState::Stopped.is_installed());
    assert!(RunState::Running.is_installed());
  }
}
