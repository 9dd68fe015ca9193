//! Live reload: filesystem changes to sync instructions.
//!
//! [`ChangeBus`] watches the served roots and emits debounced
//! [`ChangeEvent`]s. The [`Orchestrator`] classifies them and queues
//! instructions on the client registry, optionally routing markup edits
//! through the worker pool for hot patching.

mod classify;
mod debouncer;
mod orchestrator;
mod watcher;

pub use classify::{ChangeEvent, ChangeKind};
pub use debouncer::FsOp;
pub use orchestrator::{Orchestrator, ReloadPolicy};
pub use watcher::ChangeBus;
