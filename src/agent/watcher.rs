//! Device directory watcher.
//!
//! Wakes the agent loop early when a device description is added, changed
//! or removed.

use crate::agent::source::is_device_file;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Blocking watcher over the device directory.
pub struct DeviceWatcher {
    dir: PathBuf,
    events: Receiver<notify::Result<Event>>,
    // Dropping the watcher stops event delivery
    _watcher: RecommendedWatcher,
}

impl DeviceWatcher {
    /// Start watching `dir` (non-recursively).
    pub fn new(dir: impl Into<PathBuf>) -> notify::Result<Self> {
        let dir = dir.into();
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = %dir.display(), "watching device directory");
        Ok(Self {
            dir,
            events: rx,
            _watcher: watcher,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Block for up to `timeout` and drain pending events.
    ///
    /// Returns true if any of them touched a device file.
    pub fn wait(&self, timeout: Duration) -> bool {
        let first = match self.events.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => return false,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("device watcher disconnected");
                std::thread::sleep(timeout);
                return false;
            }
        };

        let mut changed = false;
        for res in std::iter::once(first).chain(self.events.try_iter()) {
            match res {
                Ok(event) if is_device_event(&event) => {
                    debug!(paths = ?event.paths, kind = ?event.kind, "device file changed");
                    changed = true;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "device watcher error"),
            }
        }
        changed
    }
}

/// Whether an event creates, modifies or removes a device description.
pub fn is_device_event(event: &Event) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );

    relevant_kind && event.paths.iter().any(|p| is_device_file(p))
}
