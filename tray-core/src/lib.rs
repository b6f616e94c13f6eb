pub mod actions;
pub mod config;
pub mod console;
pub mod error;
pub mod extract;
pub mod logging;
pub mod paths;
pub mod process;
pub mod runtime;
pub mod service;
pub mod update;
pub mod variants;
pub mod watcher;

use anyhow::Context;
use std::sync::mpsc;
use std::time::Duration;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let dry_run = runtime::configure_from_args(args);
  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let cfg = if dry_run {
    config::load_or_default_readonly(&config_path)?
  } else {
    config::load_or_create_default(&config_path)?
  };

  logging::init_file_and_stderr(&paths::logs_dir(&base), &cfg.logging)?;

  if dry_run {
    tracing::warn!("dry-run enabled: mutating actions are logged, not executed");
  }
  if let Some(problem) = config::validate_update_config(&cfg.update) {
    tracing::warn!(problem = %problem, "update settings are invalid; downloads will fail");
  }

  let actions = actions::Actions::from_config(&cfg, &base);

  match console::run_console_command(&actions, args)? {
    console::ConsoleAction::ExitOk => return Ok(()),
    console::ConsoleAction::RunWatcher => {}
  }

  tracing::info!(base = %base.display(), "starting tray-core watcher (console mode)");
  let (stop_tx, stop_rx) = mpsc::channel::<()>();

  let ctrlc_tx = stop_tx.clone();
  ctrlc::set_handler(move || {
    let _ = ctrlc_tx.send(());
  })
  .context("install Ctrl+C handler")?;

  watcher::Watcher::new(&actions, &cfg.update).run(stop_rx, Duration::from_millis(500))?;
  tracing::info!("watcher stopped");
  Ok(())
}
