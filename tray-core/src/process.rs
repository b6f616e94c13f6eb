use std::path::Path;
use std::process::{Command, Output, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// `cmd /c ""<script>" <args>"`, run from `cwd`.
///
/// The outer quotes are passed raw because `cmd` strips exactly one pair and std's argument
/// quoting would escape the inner ones.
pub fn batch_command(script: &Path, args: &[&str], cwd: &Path) -> Command {
  let mut cmd = Command::new("cmd.exe");
  cmd.current_dir(cwd);

  #[cfg(windows)]
  {
    let mut line = format!("\"\"{}\"", script.display());
    for a in args {
      line.push(' ');
      line.push_str(a);
    }
    line.push('"');
    cmd.arg("/c").raw_arg(line);
  }
  #[cfg(not(windows))]
  {
    cmd.arg("/c").arg(script).args(args);
  }

  cmd
}

pub fn hide_window(cmd: &mut Command) -> &mut Command {
  #[cfg(windows)]
  cmd.creation_flags(CREATE_NO_WINDOW);
  cmd
}

/// Opens a script in its own console without waiting for it.
pub fn launch_detached(script: &Path, cwd: &Path) -> anyhow::Result<()> {
  if !script.exists() {
    anyhow::bail!("script not found: {}", script.display());
  }
  let mut cmd = batch_command(script, &[], cwd);
  cmd
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null());
  let child = cmd
    .spawn()
    .map_err(|e| anyhow::anyhow!("launch {}: {e}", script.display()))?;
  tracing::info!(script = %script.display(), pid = child.id(), "script launched");
  Ok(())
}

/// Runs a tool to completion. Non-zero exit is an error carrying both output streams, since `sc`
/// and `reg` report failures on stdout.
pub fn run_tool(program: &str, cmd: &mut Command) -> Result<Output, String> {
  hide_window(cmd);
  let output = cmd.output().map_err(|e| format!("{program}: {e}"))?;
  if !output.status.success() {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(format!(
      "{program} failed ({}): stdout='{}' stderr='{}'",
      output.status,
      stdout.trim(),
      stderr.trim()
    ));
  }
  Ok(output)
}
