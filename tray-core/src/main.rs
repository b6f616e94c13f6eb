use anyhow::Context;

fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }

  tray_core::run_console(&args).context("run tray-core")
}
