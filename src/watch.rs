//! Change detection for the watched file.
//!
//! The watcher observes the file's *parent directory* rather than the file
//! itself: editors that save atomically (write to a temp file, then rename
//! over the target) replace the file's inode, which orphans a direct file
//! watch. Raw notifications are debounced, filtered down to the target file
//! name, and deduplicated by modification time so one logical save produces
//! exactly one [`ChangeEvent`].

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::Receiver;
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use thiserror::Error;

/// Default debounce window. A single save can emit several raw events while
/// the OS settles the write; nothing is read until this window goes quiet.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(150);

/// The watched file was unusable at startup. Fatal configuration error.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("cannot watch {}: it has no parent directory", .0.display())]
    NoParent(PathBuf),

    #[error("could not resolve {}: {source}", .path.display())]
    Resolve {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Identifies exactly one file to monitor. Immutable after construction.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    absolute_path: PathBuf,
    parent_dir: PathBuf,
    file_name: OsString,
}

impl WatchTarget {
    /// Resolves `path` to an absolute path and validates that it names an
    /// existing regular file.
    pub fn new(path: &Path) -> Result<Self, TargetError> {
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            let cwd = env::current_dir().map_err(|source| TargetError::Resolve {
                path: path.to_path_buf(),
                source,
            })?;
            cwd.join(path)
        };

        let metadata = fs_err::metadata(&absolute_path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                TargetError::NotFound(absolute_path.clone())
            } else {
                TargetError::Resolve {
                    path: absolute_path.clone(),
                    source,
                }
            }
        })?;
        if !metadata.is_file() {
            return Err(TargetError::NotAFile(absolute_path));
        }

        let parent_dir = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| TargetError::NoParent(absolute_path.clone()))?;
        let file_name = absolute_path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| TargetError::NoParent(absolute_path.clone()))?;

        Ok(Self {
            absolute_path,
            parent_dir,
            file_name,
        })
    }

    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }

    pub fn parent_dir(&self) -> &Path {
        &self.parent_dir
    }

    pub fn file_name(&self) -> &std::ffi::OsStr {
        &self.file_name
    }
}

/// One settled, deduplicated change to the watched file.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Full file content as of this change. No history is retained.
    pub content: String,
    /// Modification time that distinguished this change from the last one.
    pub modified: SystemTime,
    /// When the change was observed, for latency diagnostics.
    pub observed_at: Instant,
}

/// The underlying directory watch failed. Fatal; triggers orderly shutdown.
#[derive(Debug, Error)]
#[error("file watcher failed: {0}")]
pub struct WatchError(pub String);

/// Messages delivered to the sync loop by the watcher thread.
#[derive(Debug)]
pub enum WatchMessage {
    Changed(ChangeEvent),
    Fatal(WatchError),
}

/// Handle to a running watch. Dropping it stops the OS watcher.
pub struct FileWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
}

impl FileWatcher {
    /// Starts watching `target` with the default debounce window.
    pub fn start(target: &WatchTarget) -> Result<(Self, Receiver<WatchMessage>), WatchError> {
        Self::start_with_window(target, DEBOUNCE_WINDOW)
    }

    pub fn start_with_window(
        target: &WatchTarget,
        window: Duration,
    ) -> Result<(Self, Receiver<WatchMessage>), WatchError> {
        let (tx, rx) = crossbeam_channel::unbounded();

        let closure_target = target.clone();
        let mut last_modified: Option<SystemTime> = None;

        let mut debouncer = new_debouncer(window, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let matches_target = events.iter().any(|event| {
                        event
                            .paths
                            .iter()
                            .any(|path| path.file_name() == Some(closure_target.file_name()))
                    });
                    if !matches_target {
                        return;
                    }

                    if let Some(change) = settle(&closure_target, &mut last_modified) {
                        let _ = tx.send(WatchMessage::Changed(change));
                    }
                }
                Err(errors) => {
                    for error in errors {
                        // An error without paths is the debouncer requesting a
                        // rescan after dropping events. The next save will
                        // re-trigger us, so the watch stays usable.
                        if error.paths.is_empty() {
                            log::warn!("file watcher requested rescan; some events may have been missed");
                        } else {
                            let _ = tx.send(WatchMessage::Fatal(WatchError(error.to_string())));
                        }
                    }
                }
            }
        })
        .map_err(|err| WatchError(err.to_string()))?;

        debouncer
            .watch(target.parent_dir(), RecursiveMode::NonRecursive)
            .map_err(|err| WatchError(err.to_string()))?;

        log::debug!(
            "watching {} for changes to {}",
            target.parent_dir().display(),
            target.file_name().to_string_lossy()
        );

        Ok((
            Self {
                _debouncer: debouncer,
            },
            rx,
        ))
    }
}

/// Runs once the debounce window goes quiet: decides whether the burst of raw
/// events amounts to a real content change.
fn settle(target: &WatchTarget, last_modified: &mut Option<SystemTime>) -> Option<ChangeEvent> {
    let metadata = match fs_err::metadata(target.absolute_path()) {
        Ok(metadata) => metadata,
        Err(_) => {
            // Mid-write state during an atomic rename. A later event for the
            // rename's destination will re-trigger us.
            log::trace!(
                "{} missing at debounce fire, treating as transient",
                target.absolute_path().display()
            );
            return None;
        }
    };

    let modified = match metadata.modified() {
        Ok(modified) => modified,
        Err(err) => {
            log::debug!("could not read modification time, skipping cycle: {err}");
            return None;
        }
    };

    if *last_modified == Some(modified) {
        log::trace!("modification time unchanged, discarding duplicate notification");
        return None;
    }

    let content = match fs_err::read_to_string(target.absolute_path()) {
        Ok(content) => content,
        Err(err) => {
            // Transient read failure (permissions, vanished between the
            // existence check and the read). Leave `last_modified` untouched
            // so the next event retries this content.
            log::debug!("could not read watched file, skipping cycle: {err}");
            return None;
        }
    };

    *last_modified = Some(modified);

    Some(ChangeEvent {
        content,
        modified,
        observed_at: Instant::now(),
    })
}
