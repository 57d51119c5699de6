//! Everything related to detecting and reading newly appended lines.

use std::io;
use std::path::{Path, PathBuf};
use std::slice::Iter;
use std::time::{Duration, SystemTime};

use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::ChangeNotifier;
use crate::hub::Hub;

/// Default delay between two check cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Default upper bound on the bytes of a single line, terminator included.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

macro_rules! unwrap_res_or {
    ($res:expr, $or:expr) => {
        if let Ok(val) = $res {
            val
        } else {
            $or;
        }
    };
}

macro_rules! unwrap_res_or_continue {
    ($res:expr) => {
        unwrap_res_or!($res, continue)
    };
}

/// Batch of lines appended to the watched file since the previous check.
///
/// Lines are in file order and have their terminator stripped.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LineBatch {
    /// The path from where the lines were read.
    source: PathBuf,
    /// The batched list of lines.
    lines: Vec<String>,
}

impl LineBatch {
    /// Bundles `lines` read from `source`.
    pub fn new(source: impl Into<PathBuf>, lines: Vec<String>) -> Self {
        LineBatch {
            source: source.into(),
            lines,
        }
    }

    /// Returns a reference to the file from where the lines were read.
    pub fn source(&self) -> &Path {
        self.source.as_path()
    }

    /// Returns a slice to the vec of lines.
    pub fn lines(&self) -> &[String] {
        self.lines.as_slice()
    }

    /// Returns an iterator over the slice of lines.
    pub fn iter(&self) -> Iter<'_, String> {
        self.lines().iter()
    }

    /// Returns the number of lines in the batch.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` if the number of lines in the batch is zero.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Splits the batch into its source path and lines.
    pub fn into_inner(self) -> (PathBuf, Vec<String>) {
        let LineBatch { source, lines } = self;

        (source, lines)
    }
}

impl IntoIterator for LineBatch {
    type Item = String;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}

#[derive(Debug)]
struct WatchedFile {
    path: PathBuf,
    /// Byte offset just past the last complete line handed out.
    cursor: u64,
}

/// Owns the read cursor of a single log file and finds what was appended to
/// it since the last check.
///
/// The file is opened fresh on every cycle. A rename or delete of the file
/// therefore shows up as "not found" (and triggers a scan of the parent
/// directory for a replacement), and an in-place truncation shows up as the
/// file being shorter than the cursor.
///
/// A line is held back until its newline arrives, but never grows past
/// [`max_line_bytes`](TailDetector::with_max_line_bytes): a run of that many
/// bytes without a newline is handed out as a line of its own and consumed,
/// and the rest of it follows in later chunks.
#[derive(Debug)]
pub struct TailDetector {
    watched: Mutex<WatchedFile>,
    max_line_bytes: usize,
}

impl TailDetector {
    /// Starts tailing `path` from its first byte.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::resume(path, 0)
    }

    /// Starts tailing `path` from a previously saved cursor.
    pub fn resume(path: impl Into<PathBuf>, cursor: u64) -> Self {
        TailDetector {
            watched: Mutex::new(WatchedFile {
                path: path.into(),
                cursor,
            }),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Sets the maximum length of a single line, terminator included. Zero
    /// is raised to one.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Returns the maximum length of a single line.
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    /// Returns the path currently being tailed. This changes after rotation.
    pub async fn path(&self) -> PathBuf {
        self.watched.lock().await.path.clone()
    }

    /// Returns the byte offset just past the last line handed out.
    pub async fn cursor(&self) -> u64 {
        self.watched.lock().await.cursor
    }

    /// Runs one check cycle.
    ///
    /// Returns every line completed since the previous cycle. On error the
    /// path and cursor are left exactly as they were.
    pub async fn poll(&self) -> Result<LineBatch> {
        let mut watched = self.watched.lock().await;

        let mut path = watched.path.clone();
        let mut cursor = watched.cursor;

        let file = match open(&path).await {
            Ok(file) => file,
            Err(e) if e.is_not_found() => {
                let dir = parent_dir(&path);
                debug!(path = %path.display(), dir = %dir.display(), "log file is gone, scanning for a replacement");

                let newest = find_most_recent_log_file(dir).await?;
                if newest != path {
                    info!(from = %path.display(), to = %newest.display(), "switching to new log file");
                    path = newest;
                    cursor = 0;
                }
                open(&path).await?
            }
            Err(e) => return Err(e),
        };

        let size = file
            .metadata()
            .await
            .map_err(|source| Error::FileUnavailable {
                path: path.clone(),
                source,
            })?
            .len();

        if size < cursor {
            debug!(path = %path.display(), size, cursor, "log file shrank, reading from the start");
            cursor = 0;
        }

        let lines = if size > cursor {
            let (lines, consumed) =
                read_complete_lines(file, &path, cursor, size - cursor, self.max_line_bytes)
                    .await?;
            cursor += consumed;
            lines
        } else {
            Vec::new()
        };

        watched.path = path;
        watched.cursor = cursor;

        Ok(LineBatch::new(watched.path.clone(), lines))
    }

    /// Runs one check cycle, logging any failure and reporting it as an
    /// empty batch.
    pub async fn check_for_new_content(&self) -> LineBatch {
        match self.poll().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "skipping check cycle");
                LineBatch::new(self.path().await, Vec::new())
            }
        }
    }

    /// Reads the full current contents of the watched file, independent of
    /// the cursor.
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        let path = self.path().await;
        fs::read(&path)
            .await
            .map_err(|source| Error::FileUnavailable { path, source })
    }

    /// Checks the file every `interval` forever, publishing each non-empty
    /// batch to `hub`.
    ///
    /// Cycles never overlap. When `wakeups` is given, filesystem events
    /// trigger an extra cycle ahead of the next tick.
    pub async fn run(&self, hub: &Hub, interval: Duration, mut wakeups: Option<ChangeNotifier>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let watching = tokio::select! {
                _ = ticker.tick() => true,
                alive = next_wakeup(&mut wakeups) => alive,
            };
            if !watching {
                warn!("filesystem watcher stopped, falling back to polling only");
                wakeups = None;
            }

            let batch = self.check_for_new_content().await;
            if !batch.is_empty() {
                let evicted = hub.publish(&batch).await;
                debug!(lines = batch.len(), evicted, "published batch");
            }
        }
    }
}

async fn next_wakeup(wakeups: &mut Option<ChangeNotifier>) -> bool {
    match wakeups {
        Some(notifier) => notifier.changed().await,
        None => std::future::pending().await,
    }
}

async fn open(path: &Path) -> Result<File> {
    File::open(path)
        .await
        .map_err(|source| Error::FileUnavailable {
            path: path.to_path_buf(),
            source,
        })
}

/// Reads at most `len` bytes from `offset`, returning the complete lines
/// found and the number of bytes they span. An unterminated final line is
/// not consumed unless it has reached `max_line` bytes, in which case it is
/// returned as a line of its own.
async fn read_complete_lines(
    mut file: File,
    path: &Path,
    offset: u64,
    len: u64,
    max_line: usize,
) -> Result<(Vec<String>, u64)> {
    let read_err = |source: io::Error| Error::Read {
        path: path.to_path_buf(),
        source,
    };

    file.seek(io::SeekFrom::Start(offset))
        .await
        .map_err(read_err)?;
    let mut reader = BufReader::new(file.take(len));

    let mut lines = Vec::new();
    let mut consumed = 0;
    let mut buf = Vec::new();
    // Set after a chunk was cut at `max_line`, so that a terminator arriving
    // right behind the cut does not turn into an empty line.
    let mut split = false;
    loop {
        buf.clear();
        let n = (&mut reader)
            .take(max_line as u64)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(read_err)?;
        if n == 0 {
            break;
        }

        let terminated = buf.last() == Some(&b'\n');
        if !terminated && n < max_line {
            break;
        }
        consumed += n as u64;

        if split && matches!(buf.as_slice(), b"\n" | b"\r\n") {
            split = false;
            continue;
        }
        if !terminated {
            debug!(path = %path.display(), max_line, "line too long, splitting it");
        }
        split = !terminated;
        lines.push(decode_line(&buf));
    }

    Ok((lines, consumed))
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Returns `true` for names following the log file convention: not hidden,
/// ending in `.log` (any case).
pub fn is_log_file(path: impl AsRef<Path>) -> bool {
    let Some(name) = path.as_ref().file_name().and_then(|name| name.to_str()) else {
        return false;
    };

    !name.starts_with('.') && name.to_ascii_lowercase().ends_with(".log")
}

/// Finds the most recently modified log file directly inside `dir`.
///
/// Files with identical modification times are ordered by path, and the
/// lexicographically greatest one wins.
pub async fn find_most_recent_log_file(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let scan_err = |source: io::Error| Error::DirectoryScan {
        dir: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(scan_err)?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let mut found = 0usize;

    while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
        let path = entry.path();
        if !is_log_file(&path) {
            continue;
        }

        // Follows symlinks, so a linked log file counts as a file.
        let metadata = unwrap_res_or_continue!(fs::metadata(&path).await);
        if !metadata.is_file() {
            continue;
        }
        let modified = unwrap_res_or_continue!(metadata.modified());

        found += 1;
        let candidate = (modified, path);
        if newest.as_ref().map_or(true, |best| candidate > *best) {
            newest = Some(candidate);
        }
    }

    let (_, path) = newest.ok_or_else(|| Error::NoLogFiles {
        dir: dir.to_path_buf(),
    })?;
    debug!(dir = %dir.display(), found, newest = %path.display(), "scanned for log files");

    Ok(path)
}
