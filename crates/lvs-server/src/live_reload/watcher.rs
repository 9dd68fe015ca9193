//! Change bus: filesystem watcher feeding the debouncer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::classify::ChangeEvent;
use super::debouncer::{EventDebouncer, FsOp};

/// Watches the served roots and emits debounced, classified changes.
pub struct ChangeBus {
    roots: Vec<PathBuf>,
    ignore: Arc<[glob::Pattern]>,
    debounce: Duration,
    watcher: Option<RecommendedWatcher>,
}

impl ChangeBus {
    /// Watch `roots`, skipping paths matching any `ignore` glob.
    ///
    /// Globs are matched against paths relative to their root. Invalid
    /// patterns are logged and skipped.
    pub fn new(roots: Vec<PathBuf>, ignore: &[String], debounce: Duration) -> Self {
        let ignore = ignore
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(%pattern, error = %e, "Invalid ignore pattern");
                    None
                }
            })
            .collect();

        Self {
            roots,
            ignore,
            debounce,
            watcher: None,
        }
    }

    /// Start watching.
    ///
    /// Spawns a task that moves raw events through the debouncer and sends
    /// the result on the returned channel. The watcher stops when the bus
    /// is dropped.
    pub fn start(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeEvent>, notify::Error> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Event>(100);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                // Callback runs on the watcher thread.
                Ok(event) => {
                    let _ = raw_tx.blocking_send(event);
                }
                Err(e) => tracing::debug!(error = %e, "Watcher error"),
            }
        })?;

        for root in &self.roots {
            let mode = if root.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher.watch(root, mode)?;
            tracing::debug!(root = %root.display(), "Watching");
        }
        self.watcher = Some(watcher);

        let debouncer = EventDebouncer::new(self.debounce);
        let roots = self.roots.clone();
        let ignore = Arc::clone(&self.ignore);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = raw_rx.recv() => match event {
                        Some(event) => record_event(&event, &roots, &ignore, &debouncer),
                        None => break,
                    },
                    () = wait_until(debouncer.next_deadline()) => {
                        for ready in debouncer.drain_ready() {
                            if tx.send(ChangeEvent::new(ready.path, ready.op)).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn record_event(event: &Event, roots: &[PathBuf], ignore: &[glob::Pattern], debouncer: &EventDebouncer) {
    let op = match event.kind {
        EventKind::Create(_) => FsOp::Created,
        EventKind::Modify(_) => FsOp::Modified,
        EventKind::Remove(_) => FsOp::Removed,
        _ => return,
    };

    for path in &event.paths {
        if is_ignored(path, roots, ignore) {
            continue;
        }
        debouncer.record(path.clone(), op);
        tracing::trace!(path = %path.display(), ?op, "Recorded filesystem event");
    }
}

/// Whether `path` is outside every root or matches an ignore glob.
fn is_ignored(path: &Path, roots: &[PathBuf], ignore: &[glob::Pattern]) -> bool {
    let Some(relative) = roots.iter().find_map(|root| {
        if path == root {
            // Single-file root.
            return path.file_name().map(Path::new);
        }
        path.strip_prefix(root).ok()
    }) else {
        return true;
    };

    let relative = relative.to_string_lossy();
    ignore.iter().any(|pattern| pattern.matches(&relative))
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
