//! Filesystem-event wake-ups for the tail loop.
//!
//! Polling alone already finds every change. A [`ChangeNotifier`] only
//! shortens the time until the next check when the OS reports activity on a
//! log file next to the watched one.

use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{Error, Result};
use crate::tail::{is_log_file, parent_dir};

/// Watches the directory of a log file and signals when a log file in it is
/// created, modified or removed.
///
/// Signals coalesce: any number of events between two calls to
/// [`changed`](ChangeNotifier::changed) produce a single wake-up.
pub struct ChangeNotifier {
    _inner: notify::RecommendedWatcher,
    directory: PathBuf,
    wakeups: mpsc::Receiver<()>,
}

impl Debug for ChangeNotifier {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("directory", &self.directory)
            .finish()
    }
}

impl ChangeNotifier {
    /// Starts watching the parent directory of `path`. The directory must
    /// exist; the file itself need not.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let directory = parent_dir(path.as_ref()).to_path_buf();
        let watch_err = |source: notify::Error| Error::Watch {
            dir: directory.clone(),
            source,
        };

        let (tx, rx) = mpsc::channel(1);
        let mut inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if is_relevant(&event) => {
                    // A full channel already holds a pending wake-up.
                    let _ = tx.try_send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "filesystem watch error"),
            }
        })
        .map_err(watch_err)?;

        inner
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(watch_err)?;

        Ok(ChangeNotifier {
            _inner: inner,
            directory,
            wakeups: rx,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Waits for the next relevant filesystem event.
    ///
    /// Returns `false` if the underlying watcher has shut down and no more
    /// events will arrive.
    pub async fn changed(&mut self) -> bool {
        self.wakeups.recv().await.is_some()
    }
}

fn is_relevant(event: &notify::Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|path| is_log_file(path))
}
