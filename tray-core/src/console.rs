use crate::actions::{ActionOutcome, Actions};
use crate::runtime;

pub enum ConsoleAction {
  RunWatcher,
  ExitOk,
}

pub fn run_console_command(actions: &Actions, args: &[String]) -> anyhow::Result<ConsoleAction> {
  let args = strip_global_flags(args);

  if args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(ConsoleAction::ExitOk);
  }

  if args.iter().any(|a| a == "--variants") {
    return report(actions.list_variants());
  }

  if let Some(i) = args.iter().position(|a| a == "--service") {
    return run_service(actions, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--update") {
    return run_update(actions, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--run") {
    let Some(name) = variant_arg(&args[i + 1..]) else {
      eprintln!("expected: --run <variant>. Launchable scripts:");
      for script in actions.general_scripts() {
        eprintln!("  {script}");
      }
      return Ok(ConsoleAction::ExitOk);
    };
    return report(actions.run_variant(&name));
  }

  if let Some(unknown) = args.iter().find(|a| a.starts_with("--")) {
    eprintln!("Unknown option `{unknown}`.");
    print_help();
    return Ok(ConsoleAction::ExitOk);
  }

  Ok(ConsoleAction::RunWatcher)
}

fn run_service(actions: &Actions, tail: &[String]) -> anyhow::Result<ConsoleAction> {
  let sub = tail.first().map(|s| s.as_str()).unwrap_or("");
  match sub {
    "install" => {
      let name = variant_arg(&tail[1..])
        .ok_or_else(|| anyhow::anyhow!("expected: --service install <variant>"))?;
      report(actions.install_variant(&name))
    }
    "remove" => report(actions.remove_service()),
    "status" => report(actions.service_status()),
    "current" => report(actions.current_variant()),
    "repair" => report(actions.repair_service()),
    "run-script" => report(actions.run_service_script()),
    _ => {
      eprintln!(
        "Unknown `--service` subcommand. Expected: install <variant>|remove|status|current|repair|run-script"
      );
      print_help();
      Ok(ConsoleAction::ExitOk)
    }
  }
}

fn run_update(actions: &Actions, tail: &[String]) -> anyhow::Result<ConsoleAction> {
  let sub = tail.first().map(|s| s.as_str()).unwrap_or("");
  match sub {
    "check" => report(actions.check_for_updates(false)),
    "apply" => report(actions.apply_update()),
    "lists" => report(actions.update_lists()),
    "status" => report(actions.update_status()),
    "bootstrap" => report(actions.ensure_installed()),
    _ => {
      eprintln!("Unknown `--update` subcommand. Expected: check|apply|lists|status|bootstrap");
      print_help();
      Ok(ConsoleAction::ExitOk)
    }
  }
}

fn report(out: ActionOutcome) -> anyhow::Result<ConsoleAction> {
  if out.success {
    println!("{}", out.message);
    return Ok(ConsoleAction::ExitOk);
  }
  print_admin_hint(&out.message);
  anyhow::bail!("{}", out.message)
}

/// Variant names may contain spaces (`general (ALT2)`); an unquoted name arrives split.
fn variant_arg(rest: &[String]) -> Option<String> {
  let words: Vec<&str> = rest
    .iter()
    .take_while(|a| !a.starts_with("--"))
    .map(|s| s.as_str())
    .collect();
  let name = words.join(" ");
  (!name.trim().is_empty()).then(|| name.trim().to_string())
}

fn strip_global_flags(args: &[String]) -> Vec<String> {
  args
    .iter()
    .skip(1)
    .filter(|a| a.as_str() != "--dry-run")
    .cloned()
    .collect()
}

fn print_help() {
  println!("tray-core {}", env!("CARGO_PKG_VERSION"));
  println!();
  println!("Usage:");
  println!("  tray-core [--dry-run] <command>");
  println!("  tray-core              (no command: run the update watcher until Ctrl+C)");
  println!();
  println!("Commands:");
  println!("  --variants");
  println!("  --service install <variant>|remove|status|current|repair|run-script");
  println!("  --update check|apply|lists|status|bootstrap");
  println!("  --run <variant>");
  println!("  --version");
  println!("  --help");
  if runtime::is_dry_run() {
    println!();
    println!("DRY-RUN is active: mutating commands only log what they would do.");
  }
}

fn print_admin_hint(msg: &str) {
  if msg.contains("Administrator")
    || msg.contains("Access is denied")
    || msg.contains("FAILED 5:")
  {
    eprintln!("Hint: service changes require Administrator privileges.");
    eprintln!("Try running this terminal as Administrator and re-run the command.");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn variant_names_with_spaces_are_rejoined() {
    assert_eq!(
      variant_arg(&args(&["general", "(ALT2)", "--dry-run"])).as_deref(),
      Some("general (ALT2)")
    );
    assert_eq!(variant_arg(&args(&["general (ALT2)"])).as_deref(), Some("general (ALT2)"));
    assert_eq!(variant_arg(&args(&[])), None);
    assert_eq!(variant_arg(&args(&["--service"])), None);
  }

  #[test]
  fn global_flags_and_program_name_are_stripped() {
    assert_eq!(
      strip_global_flags(&args(&["tray-core.exe", "--dry-run", "--service", "remove"])),
      args(&["--service", "remove"])
    );
  }
}
