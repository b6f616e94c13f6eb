//! Installs, replaces and removes the worker service.
//!
//! Replacing a service is delete-then-create and is not atomic. The marker is cleared once the
//! old service is gone, so a failed create leaves neither. A crash before that clear leaves no
//! service but a marker naming the old variant; [`ServiceController::status`] reports that as
//! [`Consistency::StaleMarker`] and [`ServiceController::repair`] re-installs it.

use crate::config::{MarkerBackend, ServiceConfig};
use crate::error::ServiceError;
use crate::variants::VariantCatalog;
use crate::{paths, process, runtime};
use std::path::{Path, PathBuf};

pub mod backend;
#[cfg(windows)]
mod elevation;
#[cfg(test)]
pub(crate) mod fake;
pub mod marker;

pub use backend::{RunState, ScBackend, ServiceBackend, ServiceSpec};
pub use marker::{FileMarker, MarkerStore, RegistryMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
  Consistent,
  /// Service absent but marker present: install was interrupted between delete and create.
  StaleMarker,
  /// Service present but no marker: installed by something else, or marker was lost.
  UnknownVariant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
  pub run_state: RunState,
  pub variant: Option<String>,
  pub consistency: Consistency,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveReport {
  pub failed_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
  NothingToRepair,
  Reinstalled(String),
  MarkerCleared(String),
}

pub struct ServiceController {
  backend: Box<dyn ServiceBackend>,
  marker: Box<dyn MarkerStore>,
  cfg: ServiceConfig,
  worker: PathBuf,
}

impl ServiceController {
  pub fn new(
    backend: Box<dyn ServiceBackend>,
    marker: Box<dyn MarkerStore>,
    cfg: &ServiceConfig,
    live_dir: &Path,
  ) -> Self {
    Self {
      backend,
      marker,
      cfg: cfg.clone(),
      worker: paths::bin_dir(live_dir).join(&cfg.worker_exe),
    }
  }

  /// `sc.exe` backend with the marker store selected in config.
  pub fn from_config(cfg: &ServiceConfig, base: &Path, live_dir: &Path) -> Self {
    let marker: Box<dyn MarkerStore> = match cfg.marker_backend {
      MarkerBackend::Registry => Box::new(RegistryMarker::for_service(&cfg.name, &cfg.marker_value)),
      MarkerBackend::File => Box::new(FileMarker::new(&paths::marker_path(base))),
    };
    Self::new(Box::new(ScBackend), marker, cfg, live_dir)
  }

  pub fn service_name(&self) -> &str {
    &self.cfg.name
  }

  /// Replaces whatever is registered under the service name with `worker <args>` and records
  /// `variant` as installed.
  pub fn install(&self, variant: &str, args: &str) -> Result<(), ServiceError> {
    let name = self.cfg.name.as_str();
    let spec = ServiceSpec {
      name: name.to_string(),
      executable: self.worker.clone(),
      arguments: args.to_string(),
      display_name: self.cfg.display_name.clone(),
      description: self.cfg.description.clone(),
    };

    self.require_elevation()?;

    if runtime::is_dry_run() {
      tracing::warn!(
        service = name,
        variant,
        bin_path = %spec.bin_path(),
        "DRY-RUN: would replace service and record installed variant"
      );
      return Ok(());
    }

    // Step 1: remove the previous registration. From here until the marker write the service and
    // marker may disagree.
    if let Err(e) = self.backend.stop(name) {
      tracing::debug!(service = name, error = %e, "stop before install failed (ignored)");
    }
    if let Err(e) = self.backend.delete(name) {
      if !e.is_absent() {
        tracing::error!(service = name, error = %e, "delete before install failed");
        return Err(e);
      }
    }
    // Nothing is installed now; a failed create below must not leave the old variant recorded.
    self.marker.clear()?;

    // Step 2: create and start.
    self.backend.create(&spec).map_err(|e| match e {
      ServiceError::CreateFailed(_) => e,
      other => ServiceError::CreateFailed(other.to_string()),
    })?;
    tracing::info!(service = name, variant, bin_path = %spec.bin_path(), "service created");

    if let Err(e) = self.backend.set_description(name, &spec.description) {
      tracing::warn!(service = name, error = %e, "set service description failed");
    }

    let started = self.backend.start(name);

    // The service exists now, so the marker must name it even if it refused to start.
    if let Err(e) = self.marker.write(variant) {
      tracing::error!(
        service = name,
        variant,
        error = %e,
        "service is installed but its variant could not be recorded"
      );
      return Err(ServiceError::Marker(format!(
        "service '{name}' is installed but variant '{variant}' could not be recorded: {e}"
      )));
    }

    match started {
      Ok(()) => {
        tracing::info!(service = name, variant, "service started");
        Ok(())
      }
      Err(e) => {
        tracing::error!(service = name, variant, error = %e, "service installed but failed to start");
        Err(match e {
          ServiceError::StartFailed(_) => e,
          other => ServiceError::StartFailed(other.to_string()),
        })
      }
    }
  }

  /// Extracts the variant's arguments from its script and installs it.
  pub fn install_variant(&self, catalog: &VariantCatalog, variant: &str) -> Result<(), ServiceError> {
    let variant = variant.trim().trim_end_matches(".bat");
    let args = catalog.arguments(variant)?;
    self.install(variant, &args)
  }

  /// Best-effort teardown of the service, its drivers, the worker process and the marker.
  /// Failures are logged and collected; nothing aborts the remaining steps.
  pub fn remove(&self) -> Result<RemoveReport, ServiceError> {
    let name = self.cfg.name.as_str();
    self.require_elevation()?;

    if runtime::is_dry_run() {
      tracing::warn!(
        service = name,
        drivers = ?self.cfg.driver_services,
        "DRY-RUN: would remove service, driver services, worker process and marker"
      );
      return Ok(RemoveReport::default());
    }

    let mut report = RemoveReport::default();
    let mut step = |label: String, res: Result<(), ServiceError>| match res {
      Ok(()) => tracing::info!(step = %label, "remove step done"),
      Err(e) if e.is_absent() => tracing::debug!(step = %label, "already absent"),
      Err(e) => {
        tracing::warn!(step = %label, error = %e, "remove step failed (continuing)");
        report.failed_steps.push(label);
      }
    };

    let mut targets = vec![name.to_string()];
    targets.extend(self.cfg.driver_services.iter().cloned());
    for target in &targets {
      // Stopping an already stopped service fails too; only the delete result matters.
      if let Err(e) = self.backend.stop(target) {
        tracing::debug!(service = %target, error = %e, "stop failed (ignored)");
      }
      step(format!("delete {target}"), self.backend.delete(target));
    }

    step(
      format!("kill {}", self.cfg.worker_exe),
      self.backend.kill_process(&self.cfg.worker_exe),
    );
    step("clear marker".to_string(), self.marker.clear());

    tracing::info!(service = name, failed = report.failed_steps.len(), "service removal finished");
    Ok(report)
  }

  /// Variant recorded as installed; `None` when nothing is installed or the marker is unreadable.
  pub fn current_variant(&self) -> Option<String> {
    match self.marker.read() {
      Ok(v) => v,
      Err(e) => {
        tracing::warn!(error = %e, "unable to read installed variant marker");
        None
      }
    }
  }

  pub fn status(&self) -> Result<ServiceStatus, ServiceError> {
    let run_state = self.backend.query_state(&self.cfg.name)?;
    let variant = self.marker.read()?;
    let consistency = classify(run_state, variant.as_deref());
    Ok(ServiceStatus {
      run_state,
      variant,
      consistency,
    })
  }

  /// Recovers from an interrupted install by re-installing the marked variant, or clears the
  /// marker when that variant's script is gone.
  pub fn repair(&self, catalog: &VariantCatalog) -> Result<RepairOutcome, ServiceError> {
    let st = self.status()?;
    let Some(variant) = st.variant else {
      return Ok(RepairOutcome::NothingToRepair);
    };
    if st.consistency != Consistency::StaleMarker {
      return Ok(RepairOutcome::NothingToRepair);
    }

    if catalog.exists(&variant) {
      tracing::warn!(variant = %variant, "service missing but marker present; re-installing");
      self.install_variant(catalog, &variant)?;
      return Ok(RepairOutcome::Reinstalled(variant));
    }

    tracing::warn!(variant = %variant, "marked variant no longer exists; clearing marker");
    if runtime::is_dry_run() {
      tracing::warn!(variant = %variant, "DRY-RUN: would clear installed variant marker");
    } else {
      self.marker.clear()?;
    }
    Ok(RepairOutcome::MarkerCleared(variant))
  }

  /// Opens the bundle's own `service.bat` menu. Not part of the install/remove state machine.
  pub fn run_service_entry_script(&self, live_dir: &Path) -> anyhow::Result<()> {
    let script = paths::service_script_path(live_dir);
    if runtime::is_dry_run() {
      tracing::warn!(script = %script.display(), "DRY-RUN: would launch service script");
      return Ok(());
    }
    process::launch_detached(&script, live_dir)
  }

  fn require_elevation(&self) -> Result<(), ServiceError> {
    if self.backend.is_elevated() {
      return Ok(());
    }
    Err(ServiceError::NotElevated)
  }
}

pub fn classify(run_state: RunState, variant: Option<&str>) -> Consistency {
  match (run_state.is_installed(), variant.is_some()) {
    (false, true) => Consistency::StaleMarker,
    (true, false) => Consistency::UnknownVariant,
    _ => Consistency::Consistent,
  }
}
