//! Bounded, evicting delivery queue.
//!
//! The limiter is a pure state machine; the pool drives it with a single
//! timer. While idle, a pushed item is handed back for immediate dispatch
//! and the limiter becomes active. While active, items queue up to the
//! capacity, evicting the oldest. Each tick releases the newest queued item;
//! a tick on an empty queue returns the limiter to idle.

use std::collections::VecDeque;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 5;

/// Outcome of [`RateLimiter::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum Push<T> {
    /// Limiter was idle: dispatch now and arm the timer.
    Dispatch(T),
    /// Item buffered; `evicted` is the oldest item dropped to make room.
    Queued {
        /// Item dropped from the front of the queue, if the queue was full.
        evicted: Option<T>,
    },
}

/// Rate-limited queue keeping only the most recent items.
#[derive(Debug)]
pub struct RateLimiter<T> {
    queue: VecDeque<T>,
    capacity: usize,
    active: bool,
}

impl<T> RateLimiter<T> {
    /// Create an idle limiter buffering at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            active: false,
        }
    }

    /// Offer an item.
    pub fn push(&mut self, item: T) -> Push<T> {
        if !self.active && self.queue.is_empty() {
            self.active = true;
            return Push::Dispatch(item);
        }

        self.queue.push_back(item);
        let evicted = if self.queue.len() > self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        Push::Queued { evicted }
    }

    /// Timer fired: release the newest buffered item, or go idle.
    pub fn tick(&mut self) -> Option<T> {
        let next = self.queue.pop_back();
        if next.is_none() {
            self.active = false;
        }
        next
    }

    /// Whether the delivery timer is armed.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every buffered item and go idle.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.active = false;
    }
}

impl<T> Default for RateLimiter<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
