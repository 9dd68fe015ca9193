//! Send-with-delay buffer for one client.
//!
//! Each queued instruction carries its own deadline. Queuing an instruction
//! drops any not-yet-flushed instruction of the same kind, so a burst of
//! related changes collapses to the latest one while distinct instructions
//! keep their send order.

use std::collections::VecDeque;
use std::time::Duration;

use lvs_protocol::SyncInstruction;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct Outbox {
    wait: Duration,
    queue: VecDeque<(Instant, SyncInstruction)>,
}

impl Outbox {
    pub(crate) fn new(wait: Duration) -> Self {
        Self {
            wait,
            queue: VecDeque::new(),
        }
    }

    /// Queue `instruction` for delivery `wait` after `now`.
    pub(crate) fn push(&mut self, instruction: SyncInstruction, now: Instant) {
        let kind = instruction.kind();
        self.queue.retain(|(_, queued)| queued.kind() != kind);
        self.queue.push_back((now + self.wait, instruction));
    }

    /// Earliest pending deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        // Deadlines are pushed in order with a fixed wait.
        self.queue.front().map(|(deadline, _)| *deadline)
    }

    /// Remove and return every instruction due at `now`, in send order.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<SyncInstruction> {
        let mut due = Vec::new();
        while let Some((deadline, _)) = self.queue.front() {
            if *deadline > now {
                break;
            }
            if let Some((_, instruction)) = self.queue.pop_front() {
                due.push(instruction);
            }
        }
        due
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
