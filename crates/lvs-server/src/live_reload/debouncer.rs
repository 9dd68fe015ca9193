//! Event debouncing for the change bus.
//!
//! Editors emit several filesystem events per save. Events are held per path
//! until the path has been quiet for the debounce window, and consecutive
//! event kinds are merged so each save produces one change.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Filesystem operation after coalescing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsOp {
    Created,
    Modified,
    Removed,
}

/// A debounced filesystem event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FsEvent {
    pub(crate) path: PathBuf,
    pub(crate) op: FsOp,
}

struct Pending {
    op: FsOp,
    deadline: Instant,
}

/// Per-path event debouncer, safe to share with the watcher thread.
pub(crate) struct EventDebouncer {
    pending: Mutex<HashMap<PathBuf, Pending>>,
    window: Duration,
}

impl EventDebouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            window,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event, restarting the window for its path.
    pub(crate) fn record(&self, path: PathBuf, op: FsOp) {
        let deadline = Instant::now() + self.window;
        let mut pending = self.lock();

        match pending.entry(path) {
            Entry::Vacant(entry) => {
                entry.insert(Pending { op, deadline });
            }
            Entry::Occupied(mut entry) => match coalesce(entry.get().op, op) {
                Some(merged) => {
                    let held = entry.get_mut();
                    held.op = merged;
                    held.deadline = deadline;
                }
                // Created then removed: nothing happened.
                None => {
                    entry.remove();
                }
            },
        }
    }

    /// Remove and return events whose window has passed.
    pub(crate) fn drain_ready(&self) -> Vec<FsEvent> {
        let now = Instant::now();
        let mut ready = Vec::new();
        self.lock().retain(|path, pending| {
            if pending.deadline > now {
                return true;
            }
            ready.push(FsEvent {
                path: path.clone(),
                op: pending.op,
            });
            false
        });
        ready.sort_by(|a, b| a.path.cmp(&b.path));
        ready
    }

    /// Earliest deadline, for timer scheduling.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.lock().values().map(|p| p.deadline).min()
    }
}

/// Merge two consecutive operations on one path.
///
/// `None` means the pair cancels out.
#[allow(clippy::match_same_arms)]
fn coalesce(held: FsOp, new: FsOp) -> Option<FsOp> {
    use FsOp::{Created, Modified, Removed};

    match (held, new) {
        (Created, Created | Modified) => Some(Created),
        (Created, Removed) => None,
        (Modified, Created) => Some(Created),
        (Modified, Modified) => Some(Modified),
        (Modified, Removed) => Some(Removed),
        // Atomic save: write temp file, rename over the original.
        (Removed, Created) => Some(Modified),
        (Removed, Modified | Removed) => Some(Removed),
    }
}
