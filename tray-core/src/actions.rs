//! The operations a front end (console, tray menu) can trigger. Each one reports a short
//! user-facing outcome; details go to the log.

use crate::config::Config;
use crate::runtime::OperationGate;
use crate::service::{RepairOutcome, ServiceController};
use crate::update::{HttpBundleSource, UpdateReconciler};
use crate::variants::VariantCatalog;
use crate::{paths, runtime};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
  pub success: bool,
  pub message: String,
}

impl ActionOutcome {
  fn ok(message: impl Into<String>) -> Self {
    Self {
      success: true,
      message: message.into(),
    }
  }

  fn failed(operation: &'static str, message: impl Into<String>) -> Self {
    let message = message.into();
    tracing::error!(operation, error = %message, "action failed");
    Self {
      success: false,
      message,
    }
  }
}

pub struct Actions {
  catalog: VariantCatalog,
  service: ServiceController,
  updates: UpdateReconciler,
  gate: OperationGate,
}

impl Actions {
  pub fn new(catalog: VariantCatalog, service: ServiceController, updates: UpdateReconciler) -> Self {
    Self {
      catalog,
      service,
      updates,
      gate: OperationGate::new(),
    }
  }

  pub fn from_config(cfg: &Config, base: &Path) -> Self {
    let live = paths::live_dir(base);
    Self::new(
      VariantCatalog::new(&live, &cfg.extract.game_filter),
      ServiceController::from_config(&cfg.service, base, &live),
      UpdateReconciler::new(&cfg.update, base, Box::new(HttpBundleSource::new(&cfg.update))),
    )
  }

  pub fn variants(&self) -> Vec<String> {
    self.catalog.list()
  }

  /// `general*.bat` scripts that can be launched directly with [`Actions::run_variant`].
  pub fn general_scripts(&self) -> Vec<String> {
    self.catalog.list_general()
  }

  pub fn list_variants(&self) -> ActionOutcome {
    let variants = self.catalog.list();
    if variants.is_empty() {
      return ActionOutcome::ok(format!(
        "No variant scripts found in {}",
        self.catalog.live_dir().display()
      ));
    }
    ActionOutcome::ok(variants.join("\n"))
  }

  pub fn install_variant(&self, name: &str) -> ActionOutcome {
    const OP: &str = "install";
    let _guard = match self.gate.begin(OP) {
      Ok(g) => g,
      Err(e) => return ActionOutcome::failed(OP, e.to_string()),
    };

    match self.service.install_variant(&self.catalog, name) {
      Ok(()) if runtime::is_dry_run() => {
        ActionOutcome::ok(format!("DRY-RUN: would install variant '{name}'"))
      }
      Ok(()) => ActionOutcome::ok(format!(
        "Installed variant '{name}' as service '{}'",
        self.service.service_name()
      )),
      Err(e) => ActionOutcome::failed(OP, e.to_string()),
    }
  }

  pub fn remove_service(&self) -> ActionOutcome {
    const OP: &str = "remove";
    let _guard = match self.gate.begin(OP) {
      Ok(g) => g,
      Err(e) => return ActionOutcome::failed(OP, e.to_string()),
    };

    match self.service.remove() {
      Ok(report) if report.failed_steps.is_empty() => {
        ActionOutcome::ok(format!("Service '{}' removed", self.service.service_name()))
      }
      Ok(report) => ActionOutcome::failed(
        OP,
        format!(
          "Service removal finished with failures: {}",
          report.failed_steps.join(", ")
        ),
      ),
      Err(e) => ActionOutcome::failed(OP, e.to_string()),
    }
  }

  pub fn current_variant(&self) -> ActionOutcome {
    match self.service.current_variant() {
      Some(v) => ActionOutcome::ok(v),
      None => ActionOutcome::ok("No variant installed"),
    }
  }

  pub fn service_status(&self) -> ActionOutcome {
    match self.service.status() {
      Ok(st) => ActionOutcome::ok(format!(
        "Service: {:?}\nVariant: {}\nConsistency: {:?}",
        st.run_state,
        st.variant.as_deref().unwrap_or("none"),
        st.consistency
      )),
      Err(e) => ActionOutcome::failed("status", e.to_string()),
    }
  }

  pub fn repair_service(&self) -> ActionOutcome {
    const OP: &str = "repair";
    let _guard = match self.gate.begin(OP) {
      Ok(g) => g,
      Err(e) => return ActionOutcome::failed(OP, e.to_string()),
    };

    match self.service.repair(&self.catalog) {
      Ok(RepairOutcome::NothingToRepair) => ActionOutcome::ok("Service state is consistent"),
      Ok(RepairOutcome::Reinstalled(v)) => ActionOutcome::ok(format!("Re-installed variant '{v}'")),
      Ok(RepairOutcome::MarkerCleared(v)) => ActionOutcome::ok(format!(
        "Variant '{v}' no longer exists; cleared installed variant record"
      )),
      Err(e) => ActionOutcome::failed(OP, e.to_string()),
    }
  }

  pub fn run_service_script(&self) -> ActionOutcome {
    match self.service.run_service_entry_script(self.catalog.live_dir()) {
      Ok(()) => ActionOutcome::ok("Service script launched"),
      Err(e) => ActionOutcome::failed("run_service_script", format!("{e:#}")),
    }
  }

  pub fn run_variant(&self, name: &str) -> ActionOutcome {
    match self.catalog.run(name) {
      Ok(()) => ActionOutcome::ok(format!("Launched '{name}'")),
      Err(e) => ActionOutcome::failed("run_variant", format!("{e:#}")),
    }
  }

  /// `silent` is for the background watcher: the result is only logged.
  pub fn check_for_updates(&self, silent: bool) -> ActionOutcome {
    match self.updates.check_remote_version() {
      Ok(true) => {
        tracing::info!(silent, "new bundle version available");
        ActionOutcome::ok("New version available. Run `--update apply` to install it.")
      }
      Ok(false) => ActionOutcome::ok("You are running the latest version"),
      Err(e) if silent => {
        tracing::warn!(operation = "check_for_updates", error = ?e, "background update check failed");
        ActionOutcome {
          success: false,
          message: format!("{e:#}"),
        }
      }
      Err(e) => ActionOutcome::failed("check_for_updates", format!("Update check failed: {e:#}")),
    }
  }

  pub fn apply_update(&self) -> ActionOutcome {
    const OP: &str = "apply_update";
    let _guard = match self.gate.begin(OP) {
      Ok(g) => g,
      Err(e) => return ActionOutcome::failed(OP, e.to_string()),
    };

    match self.updates.fetch_and_merge() {
      Ok(_) if runtime::is_dry_run() => ActionOutcome::ok("DRY-RUN: would download and apply update"),
      Ok(r) => ActionOutcome::ok(format!(
        "Update applied ({} files copied). Re-install the service to use new arguments.",
        r.copied
      )),
      Err(e) => ActionOutcome::failed(OP, format!("Update failed: {e}")),
    }
  }

  pub fn ensure_installed(&self) -> ActionOutcome {
    const OP: &str = "bootstrap";
    let _guard = match self.gate.begin(OP) {
      Ok(g) => g,
      Err(e) => return ActionOutcome::failed(OP, e.to_string()),
    };

    match self.updates.ensure_installed() {
      Ok(true) => ActionOutcome::ok("Bundle downloaded into live directory"),
      Ok(false) => ActionOutcome::ok("Bundle already present"),
      Err(e) => ActionOutcome::failed(OP, format!("Bootstrap failed: {e}")),
    }
  }

  pub fn update_lists(&self) -> ActionOutcome {
    const OP: &str = "update_lists";
    let _guard = match self.gate.begin(OP) {
      Ok(g) => g,
      Err(e) => return ActionOutcome::failed(OP, e.to_string()),
    };

    match self.updates.update_lists() {
      Ok(()) => ActionOutcome::ok("Host lists updated"),
      Err(e) => ActionOutcome::failed(OP, format!("List update failed: {e:#}")),
    }
  }

  pub fn update_status(&self) -> ActionOutcome {
    let st = self.updates.state();
    let fmt_ts = |ts: Option<u64>| ts.map(|t| t.to_string()).unwrap_or_else(|| "never".to_string());
    ActionOutcome::ok(format!(
      "Last check (unix ms): {}\nLast check result: {}\nNew version available: {}\nLast apply (unix ms): {}\nLast apply result: {}",
      fmt_ts(st.last_check_at_unix_ms),
      st.last_check_result.as_deref().unwrap_or("none"),
      st.new_version_available
        .map(|v| if v { "yes" } else { "no" })
        .unwrap_or("unknown"),
      fmt_ts(st.last_apply_at_unix_ms),
      st.last_apply_result.as_deref().unwrap_or("none"),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{ServiceConfig, UpdateConfig};
  use crate::service::fake::{FakeBackend, FakeMarker};
  use crate::update::tests::{bundle_zip, FixtureSource};
  use std::fs;

  struct Harness {
    _dir: tempfile::TempDir,
    backend: FakeBackend,
    marker: FakeMarker,
    actions: Actions,
  }

  fn harness(files: &[(&str, &str)], bundle: Result<Vec<u8>, String>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let live = paths::live_dir(dir.path());
    fs::create_dir_all(&live).unwrap();
    for (name, body) in files {
      fs::write(live.join(name), body).unwrap();
    }

    let backend = FakeBackend::default();
    let marker = FakeMarker::default();
    let service = ServiceController::new(
      Box::new(backend.clone()),
      Box::new(marker.clone()),
      &ServiceConfig::default(),
      &live,
    );
    let updates = UpdateReconciler::new(&UpdateConfig::default(), dir.path(), Box::new(FixtureSource(bundle)))
      .with_staging_dir(&dir.path().join("staging"))
      .with_exe_name(Some("tray-core.exe"));

    Harness {
      actions: Actions::new(VariantCatalog::new(&live, "12"), service, updates),
      _dir: dir,
      backend,
      marker,
    }
  }

  const GENERAL_FAKE: &str =
    "@echo off\n\"%BIN%winws.exe\" --wf-tcp=80,443 --dpi-desync=fake ^\n--dpi-desync-ttl=3\n";

  #[test]
  fn install_then_current_then_remove() {
    let h = harness(&[("general_fake.bat", GENERAL_FAKE)], Err("unused".to_string()));

    let out = h.actions.install_variant("general_fake");
    assert!(out.success, "{}", out.message);
    assert_eq!(
      h.backend.service("zapret").unwrap().0.arguments,
      "--wf-tcp 80,443 --dpi-desync fake --dpi-desync-ttl 3"
    );
    assert_eq!(h.actions.current_variant().message, "general_fake");

    assert!(h.actions.remove_service().success);
    assert_eq!(h.marker.get(), None);
    assert_eq!(h.actions.current_variant().message, "No variant installed");
  }

  #[test]
  fn missing_variant_is_reported_not_installed() {
    let h = harness(&[], Err("unused".to_string()));
    let out = h.actions.install_variant("nope");
    assert!(!out.success);
    assert!(out.message.contains("nope"));
    assert!(h.backend.calls().is_empty());
  }

  #[test]
  fn operations_are_rejected_while_another_is_in_flight() {
    let h = harness(&[("general_fake.bat", GENERAL_FAKE)], Err("unused".to_string()));
    let held = h.actions.gate.begin("apply_update").unwrap();

    let out = h.actions.install_variant("general_fake");
    assert!(!out.success);
    assert_eq!(out.message, "another operation is already in progress");
    assert!(!h.actions.remove_service().success);
    assert!(h.backend.calls().is_empty());

    drop(held);
    assert!(h.actions.install_variant("general_fake").success);
  }

  #[test]
  fn list_variants_skips_service_script() {
    let h = harness(
      &[("service.bat", ""), ("general.bat", ""), ("general (ALT).bat", "")],
      Err("unused".to_string()),
    );
    assert_eq!(h.actions.variants(), vec!["general", "general (ALT)"]);
    assert_eq!(h.actions.list_variants().message, "general\ngeneral (ALT)");
  }

  #[test]
  fn apply_update_merges_bundle_and_reports_failures() {
    let zip = bundle_zip(&[("zapret-discord-youtube-main/general.bat", GENERAL_FAKE)]);
    let h = harness(&[], Ok(zip));
    let out = h.actions.apply_update();
    assert!(out.success, "{}", out.message);
    assert_eq!(h.actions.variants(), vec!["general"]);
    assert!(h.actions.update_status().message.contains("Last apply result: ok"));

    let h = harness(&[], Err("unexpected HTTP status 404".to_string()));
    let out = h.actions.apply_update();
    assert!(!out.success);
    assert!(out.message.contains("404"));
  }

  #[test]
  fn repair_reinstalls_after_interrupted_install() {
    let h = harness(&[("general_fake.bat", GENERAL_FAKE)], Err("unused".to_string()));
    h.marker.set(Some("general_fake"));

    assert!(h.actions.service_status().message.contains("StaleMarker"));
    let out = h.actions.repair_service();
    assert_eq!(out.message, "Re-installed variant 'general_fake'");
    assert!(h.actions.service_status().message.contains("Consistency: Consistent"));
  }
}
