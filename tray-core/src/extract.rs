//! Recovers the `winws.exe` command line from a variant batch script.
//!
//! The scripts are hand-written `cmd` files. Only the shape used by the shipped variants is
//! understood: a single `"%BIN%winws.exe" ...` invocation, optionally continued over several lines
//! with a trailing `^`.

use crate::error::ExtractionError;
use regex::Regex;
use std::path::{Path, MAIN_SEPARATOR};
use std::sync::OnceLock;

pub const WORKER_MARKER: &str = "winws.exe\"";
const COMMENT_PREFIX: &str = "::";
const CONTINUATION: char = '^';

pub const BIN_PLACEHOLDER: &str = "%BIN%";
pub const LISTS_PLACEHOLDER: &str = "%LISTS%";
pub const GAME_FILTER_PLACEHOLDER: &str = "%GameFilter%";

static FLAG_EQUALS: OnceLock<Regex> = OnceLock::new();

/// Resolved values for the placeholders the variant scripts use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
  pub bin_dir: String,
  pub lists_dir: String,
  pub game_filter: String,
}

impl Placeholders {
  pub fn for_live_dir(live_dir: &Path, game_filter: &str) -> Self {
    Self {
      bin_dir: dir_with_separator(&live_dir.join("bin")),
      lists_dir: dir_with_separator(&live_dir.join("lists")),
      game_filter: game_filter.to_string(),
    }
  }

  fn pairs(&self) -> [(&'static str, &str); 3] {
    [
      (BIN_PLACEHOLDER, self.bin_dir.as_str()),
      (LISTS_PLACEHOLDER, self.lists_dir.as_str()),
      (GAME_FILTER_PLACEHOLDER, self.game_filter.as_str()),
    ]
  }
}

fn dir_with_separator(dir: &Path) -> String {
  let mut s = dir.display().to_string();
  if !s.ends_with(MAIN_SEPARATOR) {
    s.push(MAIN_SEPARATOR);
  }
  s
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
  BeforeMarker,
  AfterMarker,
}

/// Produces the escaped argument string for the service binary path.
pub fn extract_args(script: &str, placeholders: &Placeholders) -> Result<String, ExtractionError> {
  let fragments = scan_invocation(script)?;
  let joined = fragments.join(" ");

  let mut result = joined;
  for (token, value) in placeholders.pairs() {
    result = result.replace(token, value);
  }

  let result = normalize_flags(&result);
  let result = result.replace('"', "\\\"").replace(CONTINUATION, "");
  Ok(result.trim().to_string())
}

fn scan_invocation(script: &str) -> Result<Vec<String>, ExtractionError> {
  let mut state = ScanState::BeforeMarker;
  let mut fragments = Vec::new();

  for raw in script.lines() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with(COMMENT_PREFIX) {
      continue;
    }

    let tail = match state {
      ScanState::BeforeMarker => {
        // ASCII lowercasing keeps byte offsets stable.
        let Some(idx) = line.to_ascii_lowercase().find(WORKER_MARKER) else {
          continue;
        };
        state = ScanState::AfterMarker;
        &line[idx + WORKER_MARKER.len()..]
      }
      ScanState::AfterMarker => line,
    };

    let tail = tail.strip_suffix(CONTINUATION).unwrap_or(tail).trim();
    if !tail.is_empty() {
      fragments.push(tail.to_string());
    }
  }

  match state {
    ScanState::BeforeMarker => Err(ExtractionError::NotFound),
    ScanState::AfterMarker => Ok(fragments),
  }
}

/// `--name=value` becomes `--name value`. Values that themselves contain `=` after the first one
/// are left alone, but the first `=` of any `--token` is always rewritten.
pub fn normalize_flags(text: &str) -> String {
  let re = FLAG_EQUALS.get_or_init(|| Regex::new(r"--(\S+?)=").expect("static flag regex"));
  re.replace_all(text, "--${1} ").into_owned()
}
