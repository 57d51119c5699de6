//! Startup configuration.
//!
//! Everything here is checked once before the tail loop starts; any error is
//! fatal to the process.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::fs;
use tracing::info;

use crate::error::{Error, Result};
use crate::hub::DEFAULT_QUEUE_CAPACITY;
use crate::tail::{find_most_recent_log_file, DEFAULT_MAX_LINE_BYTES, DEFAULT_POLL_INTERVAL};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Where the log file to tail comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Source {
    /// Tail exactly this file.
    File(PathBuf),
    /// Tail the most recently modified log file in this directory.
    Directory(PathBuf),
}

impl Source {
    /// Builds a source from the two mutually exclusive path options.
    pub fn from_options(file: Option<PathBuf>, dir: Option<PathBuf>) -> Result<Self> {
        match (file, dir) {
            (Some(_), Some(_)) => Err(Error::InvalidConfig(
                "only one of a log file or a log directory can be specified",
            )),
            (Some(file), None) => Ok(Source::File(file)),
            (None, Some(dir)) => Ok(Source::Directory(dir)),
            (None, None) => Err(Error::InvalidConfig(
                "either a log file or a log directory is required",
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub source: Source,
    /// Delay between two check cycles.
    pub poll_interval: Duration,
    pub host: String,
    pub port: u16,
    /// Lines a subscriber may have pending before it is evicted.
    pub queue_capacity: usize,
    /// Also wake the tail loop on filesystem events.
    pub fs_events: bool,
    /// Longest line, terminator included, before it is split.
    pub max_line_bytes: usize,
}

impl Config {
    /// Creates a configuration with default settings for `source`.
    pub fn new(source: Source) -> Self {
        Config {
            source,
            poll_interval: DEFAULT_POLL_INTERVAL,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            fs_events: false,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll interval must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "subscriber queue capacity must be greater than zero",
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(Error::InvalidConfig(
                "maximum line length must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolves the file the tail loop starts on.
    pub async fn resolve_target(&self) -> Result<PathBuf> {
        match &self.source {
            Source::File(path) => match fs::metadata(path).await {
                Ok(metadata) if metadata.is_file() => Ok(path.clone()),
                Ok(_) => Err(Error::InvalidConfig("log file path is not a regular file")),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(Error::MissingLogFile { path: path.clone() })
                }
                Err(source) => Err(Error::FileUnavailable {
                    path: path.clone(),
                    source,
                }),
            },
            Source::Directory(dir) => {
                let path = find_most_recent_log_file(dir).await?;
                info!(path = %path.display(), "using most recent log file");
                Ok(path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_source_options() {
        assert_eq!(
            Source::from_options(Some("a.log".into()), None).unwrap(),
            Source::File("a.log".into())
        );
        assert_eq!(
            Source::from_options(None, Some("/var/log".into())).unwrap(),
            Source::Directory("/var/log".into())
        );
        assert!(matches!(
            Source::from_options(Some("a.log".into()), Some("/var/log".into())),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Source::from_options(None, None),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let config = Config::new(Source::File("app.log".into()));
        assert_eq!(config.poll_interval, Duration::from_millis(300));
        assert_eq!(config.port, 8080);
        assert_eq!(config.queue_capacity, 100);
        assert!(!config.fs_events);
        assert_eq!(config.max_line_bytes, 1024 * 1024);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        let mut config = Config::new(Source::File("app.log".into()));
        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::new(Source::File("app.log".into()));
        config.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new(Source::File("app.log".into()));
        config.max_line_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_resolve_file() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");

        let config = Config::new(Source::File(path.clone()));
        assert!(matches!(
            config.resolve_target().await,
            Err(Error::MissingLogFile { .. })
        ));

        std::fs::write(&path, "x\n").unwrap();
        assert_eq!(config.resolve_target().await.unwrap(), path);

        let config = Config::new(Source::File(tmp_dir.path().to_path_buf()));
        assert!(matches!(
            config.resolve_target().await,
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_directory() {
        let tmp_dir = tempdir().unwrap();
        let config = Config::new(Source::Directory(tmp_dir.path().to_path_buf()));
        assert!(matches!(
            config.resolve_target().await,
            Err(Error::NoLogFiles { .. })
        ));

        let path = tmp_dir.path().join("service.log");
        std::fs::write(&path, "x\n").unwrap();
        assert_eq!(config.resolve_target().await.unwrap(), path);
    }
}
