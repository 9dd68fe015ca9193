//! Rate-limited pool of background workers.
//!
//! Workers are OS threads, each owning one [`TaskHandler`]. Every worker
//! goes through an init handshake before it receives tasks. Posted tasks
//! pass through a [`RateLimiter`] that delivers the first task at once and
//! then at most one task per interval, keeping only the most recent ones.
//! A crashed worker is not restarted; the pool keeps running with the rest.

mod handler;
mod limiter;
mod pool;
pub mod validate;
mod worker;

pub use handler::{MarkupValidator, TaskHandler};
pub use limiter::{DEFAULT_CAPACITY, Push, RateLimiter};
pub use pool::{DEFAULT_RATE_LIMIT, PoolConfig, PoolEvent, WorkerPool};
pub use worker::WorkerContext;

/// Errors from starting or using the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Scratch directory could not be created.
    #[error("failed to create worker scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    /// Worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}
