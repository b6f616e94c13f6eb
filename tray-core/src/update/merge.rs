use crate::error::UpdateError;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
  pub copied: usize,
  pub skipped: usize,
}

/// Empties the staging directory, removing leftovers of an interrupted run.
pub fn prepare_staging(staging: &Path) -> Result<(), UpdateError> {
  match fs::remove_dir_all(staging) {
    Ok(()) => tracing::debug!(staging = %staging.display(), "removed stale staging directory"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => return Err(UpdateError::merge_io(staging, e)),
  }
  fs::create_dir_all(staging).map_err(|e| UpdateError::merge_io(staging, e))
}

pub fn extract_archive(archive: &Path, into: &Path) -> Result<(), UpdateError> {
  let file = File::open(archive).map_err(|e| UpdateError::merge_io(archive, e))?;
  let mut zip = zip::ZipArchive::new(file)
    .map_err(|e| UpdateError::BadArchive(format!("{}: {e}", archive.display())))?;
  zip
    .extract(into)
    .map_err(|e| UpdateError::BadArchive(format!("extract {}: {e}", archive.display())))?;
  tracing::debug!(entries = zip.len(), into = %into.display(), "archive extracted");
  Ok(())
}

pub fn locate_bundle_root(staging: &Path, dir_name: &str) -> Result<PathBuf, UpdateError> {
  let root = staging.join(dir_name);
  if !root.is_dir() {
    return Err(UpdateError::BadArchive(format!(
      "expected top-level directory '{dir_name}' not found"
    )));
  }
  Ok(root)
}

/// Copies every file under `src` to the same relative path under `dest`, overwriting. A file named
/// like the running executable is never written.
pub fn merge_tree(src: &Path, dest: &Path, skip_exe_name: Option<&str>) -> Result<MergeReport, UpdateError> {
  let mut report = MergeReport::default();

  for entry in WalkDir::new(src).follow_links(false) {
    let entry = entry.map_err(|e| {
      let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
      UpdateError::merge_io(&at, io::Error::from(e))
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let name = entry.file_name().to_string_lossy();
    if skip_exe_name.is_some_and(|exe| name.eq_ignore_ascii_case(exe)) {
      tracing::info!(file = %entry.path().display(), "skipping running executable");
      report.skipped += 1;
      continue;
    }

    let rel = entry
      .path()
      .strip_prefix(src)
      .map_err(|e| UpdateError::merge_io(entry.path(), io::Error::new(io::ErrorKind::Other, e)))?;
    let target = dest.join(rel);
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent).map_err(|e| UpdateError::merge_io(parent, e))?;
    }
    fs::copy(entry.path(), &target).map_err(|e| UpdateError::merge_io(&target, e))?;
    report.copied += 1;
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stale_staging_is_emptied() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("zapret_update");
    fs::create_dir_all(staging.join("old/nested")).unwrap();
    fs::write(staging.join("old/nested/leftover.txt"), "x").unwrap();

    prepare_staging(&staging).unwrap();

    assert!(staging.is_dir());
    assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
  }

  #[test]
  fn merge_overwrites_and_creates_directories() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let live = dir.path().join("live");
    fs::create_dir_all(src.join("lists")).unwrap();
    fs::create_dir_all(&live).unwrap();
    fs::write(src.join("general.bat"), "new").unwrap();
    fs::write(src.join("lists/list-general.txt"), "discord.com").unwrap();
    fs::write(live.join("general.bat"), "old").unwrap();
    fs::write(live.join("keep.txt"), "untouched").unwrap();

    let report = merge_tree(&src, &live, None).unwrap();

    assert_eq!(report, MergeReport { copied: 2, skipped: 0 });
    assert_eq!(fs::read_to_string(live.join("general.bat")).unwrap(), "new");
    assert_eq!(fs::read_to_string(live.join("lists/list-general.txt")).unwrap(), "discord.com");
    assert_eq!(fs::read_to_string(live.join("keep.txt")).unwrap(), "untouched");
  }

  #[test]
  fn running_executable_name_is_never_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let live = dir.path().join("live");
    fs::create_dir_all(src.join("bin")).unwrap();
    fs::create_dir_all(&live).unwrap();
    fs::write(src.join("ZapretTray.EXE"), "bundled").unwrap();
    fs::write(src.join("bin/zaprettray.exe"), "bundled").unwrap();
    fs::write(live.join("ZapretTray.exe"), "running").unwrap();

    let report = merge_tree(&src, &live, Some("ZapretTray.exe")).unwrap();

    assert_eq!(report.skipped, 2);
    assert_eq!(fs::read_to_string(live.join("ZapretTray.exe")).unwrap(), "running");
    assert!(!live.join("bin/zaprettray.exe").exists());
  }

  #[test]
  fn garbage_archive_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("bundle.zip");
    fs::write(&archive, "not a zip").unwrap();
    assert!(matches!(
      extract_archive(&archive, dir.path()),
      Err(UpdateError::BadArchive(_))
    ));
  }

  #[test]
  fn missing_bundle_root_is_a_bad_archive() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      locate_bundle_root(dir.path(), "zapret-discord-youtube-main"),
      Err(UpdateError::BadArchive(_))
    ));
  }
}
