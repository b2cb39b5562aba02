//! Hot reload: turning file change notifications into invalidations.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use slang_module_cache::source::FileChange;

use crate::provisioner::{InvalidationReport, Provisioner};

/// What the watcher is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[expect(clippy::exhaustive_enums, reason = "It is expected to be exhaustive")]
pub enum WatcherState {
    /// Waiting for notifications.
    Idle,
    /// Checking which notified files really changed.
    ChangeDetected,
    /// Removing what was derived from changed files.
    Invalidating,
}

/// An error indicating that a directory could not be watched.
#[cfg(feature = "watch")]
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WatchError {
    /// The platform watcher failed.
    #[error("failed to watch `{}`: {source}", path.display())]
    Notify {
        /// The directory.
        path: PathBuf,
        /// Source of the error.
        source: notify::Error,
    },
}

/// Feeds changed shader files into a [`Provisioner`].
///
/// Paths arrive over a channel, from the host's own file events through
/// [`sender`](Self::sender) or from directories watched with `watch_directory`
/// (`watch` feature). Nothing happens until [`process_pending`](Self::process_pending)
/// is called, typically once per frame.
#[derive(Debug)]
#[expect(clippy::module_name_repetitions, reason = "this is intended")]
pub struct HotReloadWatcher {
    /// What gets invalidated.
    provisioner: Provisioner,
    /// Sending end handed out to notification sources.
    sender: flume::Sender<PathBuf>,
    /// Paths notified but not processed yet.
    receiver: flume::Receiver<PathBuf>,
    /// Current state.
    state: Mutex<WatcherState>,
    /// Platform watchers, kept alive while the watcher lives.
    #[cfg(feature = "watch")]
    watchers: Vec<notify::RecommendedWatcher>,
}

impl HotReloadWatcher {
    /// Creates a watcher invalidating `provisioner`.
    #[inline]
    #[must_use]
    pub fn new(provisioner: Provisioner) -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            provisioner,
            sender,
            receiver,
            state: Mutex::new(WatcherState::Idle),
            #[cfg(feature = "watch")]
            watchers: Vec::new(),
        }
    }

    /// A sender for paths of changed files.
    #[inline]
    #[must_use]
    pub fn sender(&self) -> flume::Sender<PathBuf> {
        self.sender.clone()
    }

    /// Notifies that `path` may have changed.
    #[inline]
    pub fn notify_changed(&self, path: impl Into<PathBuf>) {
        // The receiver lives in `self`, so sending can not fail.
        let _sent = self.sender.send(path.into());
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    /// Number of notifications waiting to be processed.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Handles every notification received so far.
    ///
    /// Notified files whose content did not change, or which no shader includes or
    /// waits for, are ignored.
    #[inline]
    pub fn process_pending(&self) -> InvalidationReport {
        let paths: Vec<PathBuf> = self.receiver.try_iter().collect();
        if paths.is_empty() {
            return InvalidationReport::default();
        }
        log::trace!("processing {} change notification(s)", paths.len());
        self.reload(paths)
    }

    /// Checks every file the provisioner has loaded or is waiting for, for when
    /// notifications may have been missed.
    #[inline]
    pub fn check_all(&self) -> InvalidationReport {
        self.receiver.drain().for_each(drop);
        let mut paths = self.provisioner.sources().tracked_files();
        paths.extend(self.provisioner.unresolved_files());
        self.reload(paths)
    }

    /// Invalidates whatever depends on the files among `paths` that really changed.
    fn reload(&self, paths: Vec<PathBuf>) -> InvalidationReport {
        self.set_state(WatcherState::ChangeDetected);
        let sources = self.provisioner.sources();
        let unresolved = self.provisioner.unresolved_files();
        let mut changed: Vec<PathBuf> = paths
            .into_iter()
            .map(|path| canonical(&path))
            .filter(|path| {
                sources.digest(path).is_some() || unresolved.binary_search(path).is_ok()
            })
            .collect();
        changed.sort();
        changed.dedup();
        changed.retain(|path| match sources.refresh(path) {
            Ok(FileChange::Unchanged) => false,
            Ok(FileChange::Changed | FileChange::Removed) => true,
            Err(err) => {
                log::warn!("{err}");
                true
            }
        });

        let report = if changed.is_empty() {
            InvalidationReport::default()
        } else {
            for path in &changed {
                log::debug!("`{}` changed", path.display());
            }
            self.set_state(WatcherState::Invalidating);
            self.provisioner.invalidate_paths(&changed)
        };
        self.set_state(WatcherState::Idle);
        report
    }

    /// Moves to `state`.
    fn set_state(&self, state: WatcherState) {
        let mut current = self.state.lock();
        if *current != state {
            log::trace!("hot reload {:?} -> {state:?}", *current);
            *current = state;
        }
    }

    /// Watches `dir` and everything below it, feeding created and modified files
    /// into this watcher.
    ///
    /// # Errors
    ///
    /// Fails if the platform watcher can not be created or the directory can not be watched.
    #[cfg(feature = "watch")]
    #[inline]
    pub fn watch_directory(&mut self, dir: &Path) -> Result<(), WatchError> {
        use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};

        let error = |source| WatchError::Notify {
            path: dir.to_path_buf(),
            source,
        };
        let sender = self.sender.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            if sender.send(path).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(err) => log::warn!("file watcher error: {err}"),
            },
            Config::default(),
        )
        .map_err(error)?;
        watcher.watch(dir, RecursiveMode::Recursive).map_err(error)?;
        log::debug!("watching `{}` for shader changes", dir.display());
        self.watchers.push(watcher);
        Ok(())
    }
}

/// The canonical form of `path`, or `path` itself if it no longer exists.
fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_err| path.to_path_buf())
}
