use crate::actions::Actions;
use crate::config::UpdateConfig;
use crate::runtime::now_unix_ms;
use crate::update::UpdateScheduler;
use std::sync::mpsc;
use std::time::Duration;

/// Background mode: bootstraps the live directory, then runs the periodic version check until
/// stopped.
pub struct Watcher<'a> {
  actions: &'a Actions,
  scheduler: UpdateScheduler,
}

impl<'a> Watcher<'a> {
  pub fn new(actions: &'a Actions, cfg: &UpdateConfig) -> Self {
    Self {
      actions,
      scheduler: UpdateScheduler::new(cfg, now_unix_ms()),
    }
  }

  pub fn run(&mut self, stop_rx: mpsc::Receiver<()>, tick: Duration) -> anyhow::Result<()> {
    tracing::info!(next_check_unix_ms = ?self.scheduler.next_due_ms(), "watcher started");

    let bootstrap = self.actions.ensure_installed();
    if bootstrap.success {
      tracing::info!(result = %bootstrap.message, "live directory checked");
    }

    let status = self.actions.service_status();
    tracing::info!(status = %status.message.replace('\n', "; "), "service state at startup");

    loop {
      if self.scheduler.tick_at(now_unix_ms()) {
        // Failures are logged inside; the loop never stops because of them.
        let out = self.actions.check_for_updates(true);
        tracing::info!(success = out.success, result = %out.message, "periodic update check");
      }

      if stop_rx.recv_timeout(tick).is_ok() {
        break;
      }
    }

    tracing::info!("watcher exiting");
    Ok(())
  }
}
