//! Application state.
//!
//! Shared state for all request handlers.

use std::sync::Arc;

use crate::inject::Site;
use crate::sync::{ClientRegistry, SyncSettings};

/// Application state shared across all handlers.
pub(crate) struct AppState {
    /// Connected sync clients.
    pub(crate) clients: Arc<ClientRegistry>,
    /// Sync channel settings.
    pub(crate) sync: SyncSettings,
    /// Static site with mounts.
    pub(crate) site: Site,
    /// Whether the sync endpoints are routed.
    pub(crate) live_reload: bool,
}
