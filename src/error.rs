//! Errors surfaced by the tail detector and startup configuration.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The watched file could not be opened or stat'ed.
    #[error("log file {} is unavailable: {source}", path.display())]
    FileUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The directory holding log files could not be listed.
    #[error("failed to scan directory {}: {source}", dir.display())]
    DirectoryScan {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no log files found in directory: {}", dir.display())]
    NoLogFiles { dir: PathBuf },
    /// Seeking or reading failed part way through a check cycle.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The filesystem watcher could not be started.
    #[error("failed to watch {}: {source}", dir.display())]
    Watch {
        dir: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("log file does not exist: {}", path.display())]
    MissingLogFile { path: PathBuf },
    /// The embedded viewer page template failed to parse.
    #[cfg(feature = "server")]
    #[error("failed to load page template: {0}")]
    Template(#[from] tera::Error),
}

impl Error {
    /// Returns `true` if the watched file has disappeared, which is the
    /// signal to look for a rotated replacement.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::FileUnavailable { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}
