//! Write-once JSON store for session results.
//!
//! Each result lands in `<dir>/<run_id>.json`. The directory is created
//! once when the store is constructed; existing documents are never
//! overwritten.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::result::SessionResult;

/// Default output directory for persisted results
pub const DEFAULT_RESULTS_DIR: &str = "results";

/// Errors that can occur while persisting or loading results.
#[derive(Debug)]
pub enum StoreError {
    /// The output directory could not be created
    CreateDir { path: PathBuf, source: std::io::Error },

    /// A document for this run already exists
    AlreadyExists { path: PathBuf },

    /// Writing or reading a document failed
    Io { path: PathBuf, source: std::io::Error },

    /// The result could not be encoded or decoded
    Serialize(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::CreateDir { path, source } => {
                write!(f, "Failed to create results directory {}: {}", path.display(), source)
            }
            StoreError::AlreadyExists { path } => {
                write!(f, "Result document already exists: {}", path.display())
            }
            StoreError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            StoreError::Serialize(e) => write!(f, "Failed to serialize result: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::CreateDir { source, .. } => Some(source),
            StoreError::Io { source, .. } => Some(source),
            StoreError::Serialize(e) => Some(e),
            StoreError::AlreadyExists { .. } => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialize(err)
    }
}

/// Directory of persisted session results.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::CreateDir` if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        debug!(dir = %dir.display(), "Result store ready");
        Ok(Self { dir })
    }

    /// Get the output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the document for `run_id`.
    pub fn path_for(&self, run_id: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    /// Persist `result` and return the document path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a document with the same run
    /// id is present, or an I/O / serialization error.
    pub fn save(&self, result: &SessionResult) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&result.run_id);
        let body = serde_json::to_vec_pretty(result)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    StoreError::AlreadyExists { path: path.clone() }
                } else {
                    StoreError::Io {
                        path: path.clone(),
                        source,
                    }
                }
            })?;

        file.write_all(&body)
            .and_then(|_| file.sync_all())
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        info!(
            run_id = %result.run_id,
            path = %path.display(),
            samples = result.data.len(),
            "Saved session result"
        );

        Ok(path)
    }

    /// Read back a persisted result.
    pub fn load(&self, run_id: &Uuid) -> Result<SessionResult, StoreError> {
        let path = self.path_for(run_id);
        let body = std::fs::read(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(serde_json::from_slice(&body)?)
    }
}
