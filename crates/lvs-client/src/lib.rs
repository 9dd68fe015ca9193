//! Native client for the lvs sync channel.
//!
//! Mirrors what the injected browser script does, against any [`Page`]:
//!
//! - polls the status endpoint before the first connection
//! - announces displayed files and applies [`SyncInstruction`]s
//! - hot patches the body through a structural diff that keeps focus
//! - reconnects with growing backoff, reloading after a reconnection
//!
//! # Example
//!
//! ```ignore
//! use lvs_client::{Dispatcher, DocumentPage, PatchFailure, SyncClient};
//!
//! let page = DocumentPage::new("<p>hello</p>", vec!["/index.html".to_owned()])?;
//! let mut dispatcher = Dispatcher::new(page, PatchFailure::Banner);
//! let (_console_tx, mut console) = tokio::sync::mpsc::unbounded_channel();
//!
//! let client = SyncClient::new("http://127.0.0.1:5555/")?;
//! let exit = client.run(&mut dispatcher, &mut console).await;
//! ```
//!
//! [`SyncInstruction`]: lvs_protocol::SyncInstruction

mod client;
pub mod dispatch;
pub mod dom;
pub mod page;
pub mod reconnect;
pub mod status;

pub use client::{Exit, SyncClient};
pub use dispatch::{Applied, Dispatcher};
pub use dom::{Document, DomError, NodeId, PatchStats};
pub use page::{DocumentPage, Page, PatchFailure};
pub use reconnect::{ConnectionState, Opened, Reconnect};

/// Client error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Server address could not be parsed.
    #[error("invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Server address uses a scheme other than http or https.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not the expected JSON.
    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),

    /// Markup could not be turned into a tree.
    #[error(transparent)]
    Dom(#[from] DomError),
}
