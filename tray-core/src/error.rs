use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
  #[error("winws.exe invocation not found in script")]
  NotFound,
}

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("service management requires Administrator privileges")]
  NotElevated,

  #[error("variant script not found: {0}")]
  VariantMissing(String),

  #[error(transparent)]
  Extraction(#[from] ExtractionError),

  #[error("service create failed: {0}")]
  CreateFailed(String),

  #[error("service delete failed: {0}")]
  DeleteFailed(String),

  #[error("service start failed: {0}")]
  StartFailed(String),

  #[error("command failed: {0}")]
  Command(String),

  #[error("installed variant marker: {0}")]
  Marker(String),

  #[error("{0} is not present")]
  Absent(String),
}

impl ServiceError {
  /// The target was already gone. `sc` reports 1060 in every locale; `taskkill` is mapped to
  /// [`ServiceError::Absent`] by its exit code.
  pub fn is_absent(&self) -> bool {
    match self {
      ServiceError::Absent(_) => true,
      ServiceError::DeleteFailed(m) | ServiceError::Command(m) => m.contains("1060"),
      _ => false,
    }
  }
}

#[derive(Debug, Error)]
pub enum UpdateError {
  #[error("download failed: {0}")]
  DownloadFailed(String),

  #[error("bad archive: {0}")]
  BadArchive(String),

  #[error("merge I/O failure at {path}: {source}")]
  MergeIo {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

impl UpdateError {
  pub fn merge_io(path: &std::path::Path, source: std::io::Error) -> Self {
    UpdateError::MergeIo {
      path: path.display().to_string(),
      source,
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
  #[error("another operation is already in progress")]
  Busy,
}
