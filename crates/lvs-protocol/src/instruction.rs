//! Server → client sync instructions.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

const RELOAD: &str = "reload";
const REFRESH_CSS: &str = "refreshcss";
const REFRESH_CSS_SILENT: &str = "refreshcss-silent";
const CONNECTED: &str = "connected";
const INIT_REMOTE_LOGS: &str = "initRemoteLogs";

/// Instruction delivered to a connected client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncInstruction {
    /// Full page reload.
    Reload,
    /// Re-fetch every external stylesheet with a cache-busting parameter.
    RefreshStylesheet {
        /// Suppress the client-side notification.
        silent: bool,
    },
    /// Replace the client URL.
    Navigate(String),
    /// Replace the page body, either directly or through a structural diff.
    BodyPatch {
        /// New body markup.
        html: String,
        /// Diff against the cached body instead of replacing it wholesale.
        hot: bool,
    },
    /// Single informational message.
    Message(String),
    /// Batch of informational messages (validation reports).
    Messages(Vec<String>),
    /// Sent once after the channel opens.
    Connected,
    /// Ask the client to forward console output.
    InitRemoteLogs,
}

/// JSON object form of an instruction.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    navigate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl SyncInstruction {
    /// Encode to the wire representation.
    pub fn to_wire(&self) -> String {
        let object = match self {
            Self::Reload => return RELOAD.to_owned(),
            Self::RefreshStylesheet { silent: false } => return REFRESH_CSS.to_owned(),
            Self::RefreshStylesheet { silent: true } => return REFRESH_CSS_SILENT.to_owned(),
            Self::Connected => return CONNECTED.to_owned(),
            Self::InitRemoteLogs => return INIT_REMOTE_LOGS.to_owned(),
            Self::Navigate(url) => WireObject {
                navigate: Some(url.clone()),
                ..WireObject::default()
            },
            Self::BodyPatch { html, hot } => WireObject {
                body: Some(html.clone()),
                hot: Some(*hot),
                ..WireObject::default()
            },
            Self::Message(text) => WireObject {
                message: Some(text.clone()),
                ..WireObject::default()
            },
            Self::Messages(list) => WireObject {
                messages: Some(list.clone()),
                ..WireObject::default()
            },
        };
        // A struct of strings and bools always serializes.
        serde_json::to_string(&object).unwrap_or_else(|_| RELOAD.to_owned())
    }

    /// Decode a wire message.
    ///
    /// Accepts bare words, JSON strings holding a bare word, and JSON objects.
    /// Objects are resolved by field precedence: `navigate`, `body`,
    /// `messages`, `message`.
    pub fn from_wire(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if let Some(instruction) = Self::from_word(trimmed) {
            return Ok(instruction);
        }

        if trimmed.starts_with('"') {
            let word: String = serde_json::from_str(trimmed)?;
            return Self::from_word(&word).ok_or(ProtocolError::Unknown(word));
        }

        if !trimmed.starts_with('{') {
            return Err(ProtocolError::Unknown(trimmed.to_owned()));
        }

        let object: WireObject = serde_json::from_str(trimmed)?;
        if let Some(url) = object.navigate {
            return Ok(Self::Navigate(url));
        }
        if let Some(html) = object.body {
            return Ok(Self::BodyPatch {
                html,
                hot: object.hot.unwrap_or(false),
            });
        }
        if let Some(list) = object.messages {
            return Ok(Self::Messages(list));
        }
        if let Some(text) = object.message {
            return Ok(Self::Message(text));
        }
        Err(ProtocolError::Empty)
    }

    fn from_word(word: &str) -> Option<Self> {
        match word {
            RELOAD => Some(Self::Reload),
            REFRESH_CSS => Some(Self::RefreshStylesheet { silent: false }),
            REFRESH_CSS_SILENT => Some(Self::RefreshStylesheet { silent: true }),
            CONNECTED => Some(Self::Connected),
            INIT_REMOTE_LOGS => Some(Self::InitRemoteLogs),
            _ => None,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reload => "reload",
            Self::RefreshStylesheet { .. } => "refresh-stylesheet",
            Self::Navigate(_) => "navigate",
            Self::BodyPatch { .. } => "body-patch",
            Self::Message(_) => "message",
            Self::Messages(_) => "messages",
            Self::Connected => "connected",
            Self::InitRemoteLogs => "init-remote-logs",
        }
    }
}
