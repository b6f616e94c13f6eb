use crate::error::ActionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static DRY_RUN: AtomicBool = AtomicBool::new(false);

pub fn configure_from_args(args: &[String]) -> bool {
  let enabled = args.iter().any(|arg| arg == "--dry-run");
  set_dry_run(enabled);
  enabled
}

pub fn set_dry_run(enabled: bool) {
  DRY_RUN.store(enabled, Ordering::SeqCst);
}

pub fn is_dry_run() -> bool {
  DRY_RUN.load(Ordering::SeqCst)
}

pub fn now_unix_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

/// Admits at most one lifecycle operation (install, remove, repair, update) at a time.
///
/// In-process only: a second tray-core process can still race on the live directory.
#[derive(Debug, Default)]
pub struct OperationGate {
  in_flight: AtomicBool,
}

#[derive(Debug)]
pub struct OperationGuard<'a> {
  gate: &'a OperationGate,
  name: &'static str,
}

impl OperationGuard<'_> {
  pub fn name(&self) -> &'static str {
    self.name
  }
}

impl Drop for OperationGuard<'_> {
  fn drop(&mut self) {
    self.gate.in_flight.store(false, Ordering::SeqCst);
  }
}

impl OperationGate {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn begin(&self, name: &'static str) -> Result<OperationGuard<'_>, ActionError> {
    if self
      .in_flight
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      tracing::warn!(operation = name, "rejected: another operation is in progress");
      return Err(ActionError::Busy);
    }
    Ok(OperationGuard { gate: self, name })
  }

  pub fn is_busy(&self) -> bool {
    self.in_flight.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_operation_is_rejected_until_first_finishes() {
    let gate = OperationGate::new();
    let first = gate.begin("install").unwrap();
    assert_eq!(first.name(), "install");
    assert!(gate.is_busy());
    assert_eq!(gate.begin("apply_update").unwrap_err(), ActionError::Busy);
    drop(first);

    assert!(!gate.is_busy());
    let again = gate.begin("apply_update").unwrap();
    drop(again);
  }
}
