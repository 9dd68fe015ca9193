//! Connected client registry.
//!
//! One registry per server instance. Each entry holds the sending half of
//! the client's instruction channel and the file the client last announced.
//! Delivery timing is handled by the client's connection task.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lvs_protocol::SyncInstruction;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of a connected client.
pub type ClientId = Uuid;

/// Sending half of a client's instruction channel.
pub type InstructionSender = mpsc::UnboundedSender<SyncInstruction>;

struct ClientEntry {
    sender: InstructionSender,
    file: Option<String>,
}

/// Registry of connected clients.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, ClientEntry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a client and return its id.
    pub fn register(&self, sender: InstructionSender) -> ClientId {
        let id = Uuid::new_v4();
        self.lock().insert(id, ClientEntry { sender, file: None });
        tracing::debug!(client = %id, "Client connected");
        id
    }

    /// Remove a client.
    pub fn unregister(&self, id: ClientId) {
        if self.lock().remove(&id).is_some() {
            tracing::debug!(client = %id, "Client disconnected");
        }
    }

    /// Record the file a client displays.
    ///
    /// Files are compared relative to the served root, so a leading `/` is
    /// ignored.
    pub fn set_file(&self, id: ClientId, file: &str) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.file = Some(normalize_file(file).to_owned());
        }
    }

    /// File last announced by a client.
    pub fn file_of(&self, id: ClientId) -> Option<String> {
        self.lock().get(&id).and_then(|entry| entry.file.clone())
    }

    /// Whether at least one client displays `file`.
    pub fn is_displayed(&self, file: &str) -> bool {
        let file = normalize_file(file);
        self.lock()
            .values()
            .any(|entry| entry.file.as_deref() == Some(file))
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no client is connected.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver to every client. Returns the number of recipients.
    pub fn broadcast(&self, instruction: &SyncInstruction) -> usize {
        self.deliver(instruction, |_| true)
    }

    /// Deliver to clients displaying `file`. Returns the number of recipients.
    pub fn send_to_file(&self, file: &str, instruction: &SyncInstruction) -> usize {
        let file = normalize_file(file);
        self.deliver(instruction, |entry| entry.file.as_deref() == Some(file))
    }

    /// Deliver to one client. Returns whether it is still connected.
    pub fn send_to(&self, id: ClientId, instruction: SyncInstruction) -> bool {
        self.lock()
            .get(&id)
            .is_some_and(|entry| entry.sender.send(instruction).is_ok())
    }

    fn deliver(
        &self,
        instruction: &SyncInstruction,
        filter: impl Fn(&ClientEntry) -> bool,
    ) -> usize {
        let mut clients = self.lock();
        let mut delivered = 0;
        clients.retain(|id, entry| {
            if !filter(entry) {
                return true;
            }
            if entry.sender.send(instruction.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                // Connection task is gone without unregistering.
                tracing::debug!(client = %id, "Dropping closed client");
                false
            }
        });
        tracing::debug!(kind = instruction.kind(), delivered, "Instruction queued");
        delivered
    }
}

fn normalize_file(file: &str) -> &str {
    file.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(registry: &ClientRegistry) -> (ClientId, mpsc::UnboundedReceiver<SyncInstruction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.register(tx), rx)
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = ClientRegistry::new();
        let (a, _rx_a) = client(&registry);
        let (_b, _rx_b) = client(&registry);
        assert_eq!(registry.len(), 2);

        registry.unregister(a);
        assert_eq!(registry.len(), 1);
        assert!(!registry.send_to(a, SyncInstruction::Reload));
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let registry = ClientRegistry::new();
        let (_a, mut rx_a) = client(&registry);
        let (_b, mut rx_b) = client(&registry);

        assert_eq!(registry.broadcast(&SyncInstruction::Reload), 2);
        assert_eq!(rx_a.try_recv().unwrap(), SyncInstruction::Reload);
        assert_eq!(rx_b.try_recv().unwrap(), SyncInstruction::Reload);
    }

    #[test]
    fn test_send_to_file_targets_displaying_clients() {
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = client(&registry);
        let (b, mut rx_b) = client(&registry);
        registry.set_file(a, "/index.html");
        registry.set_file(b, "about.html");

        assert!(registry.is_displayed("index.html"));
        assert_eq!(registry.file_of(a).as_deref(), Some("index.html"));

        let patch = SyncInstruction::BodyPatch {
            html: "<p>x</p>".to_owned(),
            hot: true,
        };
        assert_eq!(registry.send_to_file("index.html", &patch), 1);
        assert_eq!(rx_a.try_recv().unwrap(), patch);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_closed_clients_are_pruned() {
        let registry = ClientRegistry::new();
        let (_a, rx_a) = client(&registry);
        let (_b, _rx_b) = client(&registry);
        drop(rx_a);

        assert_eq!(registry.broadcast(&SyncInstruction::Reload), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registries_are_independent() {
        let first = ClientRegistry::new();
        let second = ClientRegistry::new();
        let (_a, _rx) = client(&first);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }
}
