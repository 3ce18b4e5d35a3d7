use std::path::PathBuf;

use thiserror::Error;

/// Failures the catalog surfaces to its callers.
///
/// Corrupt or missing catalog files, failed file removals and unknown ids are
/// deliberately not represented here: they are recovered inside the store
/// (empty read, warning log, `false`).
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The storage directory could not be created. Fatal at startup.
    #[error("catalog storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing the temp file or renaming it over the catalog failed.
    #[error("failed to write catalog {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize catalog: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The blocking task running a catalog operation panicked or was cancelled.
    #[error("catalog task failed: {0}")]
    Task(String),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
