use crate::config::{validate_update_config, UpdateConfig, ALLOWED_REPO_HOST};
use crate::error::UpdateError;
use reqwest::blocking::{Client, Response};
use reqwest::header::USER_AGENT;
use reqwest::redirect::Policy;
use reqwest::Url;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

const MAX_ARCHIVE_BYTES: u64 = 128 * 1024 * 1024;
const MAX_REDIRECTS: usize = 5;
/// GitHub answers archive requests with a redirect to its download host.
const ARCHIVE_HOST: &str = "codeload.github.com";

/// Where the bundle archive comes from.
pub trait BundleSource {
  /// Writes the archive to `dest`, replacing anything already there.
  fn fetch_to(&self, dest: &Path) -> Result<(), UpdateError>;
}

/// `<repo_url>/archive/refs/heads/<branch>.zip`
pub fn archive_url(cfg: &UpdateConfig) -> String {
  format!(
    "{}/archive/refs/heads/{}.zip",
    cfg.repo_url.trim_end_matches('/'),
    cfg.branch.trim()
  )
}

/// Top-level directory GitHub puts in branch archives: `<repo>-<branch>`.
pub fn bundle_dir_name(cfg: &UpdateConfig) -> String {
  let repo = cfg
    .repo_url
    .trim_end_matches('/')
    .rsplit('/')
    .next()
    .unwrap_or_default()
    .trim_end_matches(".git");
  format!("{repo}-{}", cfg.branch.trim())
}

pub struct HttpBundleSource {
  cfg: UpdateConfig,
}

impl HttpBundleSource {
  pub fn new(cfg: &UpdateConfig) -> Self {
    Self { cfg: cfg.clone() }
  }

  fn client(&self) -> Result<Client, UpdateError> {
    let policy = Policy::custom(|attempt| {
      if attempt.previous().len() >= MAX_REDIRECTS {
        return attempt.error("too many redirects");
      }
      if is_allowed_download_url(attempt.url()) {
        attempt.follow()
      } else {
        attempt.stop()
      }
    });

    Client::builder()
      .timeout(Duration::from_secs(self.cfg.timeout_seconds))
      .redirect(policy)
      .build()
      .map_err(|e| UpdateError::DownloadFailed(format!("build HTTP client: {e}")))
  }
}

impl BundleSource for HttpBundleSource {
  fn fetch_to(&self, dest: &Path) -> Result<(), UpdateError> {
    if let Some(problem) = validate_update_config(&self.cfg) {
      return Err(UpdateError::DownloadFailed(problem));
    }

    let raw = archive_url(&self.cfg);
    let url = Url::parse(&raw)
      .map_err(|e| UpdateError::DownloadFailed(format!("invalid archive URL {raw}: {e}")))?;

    let client = self.client()?;
    tracing::info!(url = %safe_url_label(&url), timeout_s = self.cfg.timeout_seconds, "downloading bundle");

    let response = client
      .get(url.clone())
      .header(USER_AGENT, format!("tray-core/{}", env!("CARGO_PKG_VERSION")))
      .send()
      .map_err(|e| UpdateError::DownloadFailed(format!("GET {}: {e}", safe_url_label(&url))))?;

    if !response.status().is_success() {
      return Err(UpdateError::DownloadFailed(format!(
        "unexpected HTTP status {} for {}",
        response.status().as_u16(),
        safe_url_label(response.url())
      )));
    }

    let written = write_response_with_limit(response, dest, MAX_ARCHIVE_BYTES)?;
    tracing::info!(bytes = written, dest = %dest.display(), "bundle downloaded");
    Ok(())
  }
}

fn is_allowed_download_url(url: &Url) -> bool {
  url.scheme() == "https"
    && matches!(url.host_str(), Some(h) if h == ALLOWED_REPO_HOST || h == ARCHIVE_HOST)
}

fn write_response_with_limit(
  response: Response,
  dest: &Path,
  max_bytes: u64,
) -> Result<u64, UpdateError> {
  let mut file = File::create(dest).map_err(|e| UpdateError::merge_io(dest, e))?;
  let mut limited = response.take(max_bytes.saturating_add(1));
  let written = io::copy(&mut limited, &mut file)
    .map_err(|e| UpdateError::DownloadFailed(format!("read response body: {e}")))?;

  if written > max_bytes {
    return Err(UpdateError::DownloadFailed(format!(
      "response exceeds max size {max_bytes} bytes"
    )));
  }
  Ok(written)
}

fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn archive_url_and_bundle_dir_follow_github_layout() {
    let cfg = UpdateConfig::default();
    assert_eq!(
      archive_url(&cfg),
      "https://github.com/Flowseal/zapret-discord-youtube/archive/refs/heads/main.zip"
    );
    assert_eq!(bundle_dir_name(&cfg), "zapret-discord-youtube-main");

    let cfg = UpdateConfig {
      repo_url: "https://github.com/someone/fork.git/".to_string(),
      branch: "dev".to_string(),
      ..UpdateConfig::default()
    };
    assert_eq!(bundle_dir_name(&cfg), "fork-dev");
  }

  #[test]
  fn redirects_only_to_github_over_https() {
    let ok = Url::parse("https://codeload.github.com/Flowseal/zapret-discord-youtube/zip/refs/heads/main").unwrap();
    let http = Url::parse("http://codeload.github.com/x.zip").unwrap();
    let other = Url::parse("https://example.com/x.zip").unwrap();
    assert!(is_allowed_download_url(&ok));
    assert!(!is_allowed_download_url(&http));
    assert!(!is_allowed_download_url(&other));
  }

  #[test]
  fn invalid_config_fails_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = UpdateConfig {
      repo_url: "http://github.com/Flowseal/zapret-discord-youtube".to_string(),
      ..UpdateConfig::default()
    };
    let err = HttpBundleSource::new(&cfg)
      .fetch_to(&dir.path().join("bundle.zip"))
      .unwrap_err();
    assert!(matches!(err, UpdateError::DownloadFailed(_)));
    assert!(!dir.path().join("bundle.zip").exists());
  }
}
