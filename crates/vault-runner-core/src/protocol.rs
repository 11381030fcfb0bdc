//! Protocol types for launcher-daemon communication.
//!
//! The vault-runner protocol uses JSON over a Unix socket with
//! newline-delimited messages, one request per connection. A launcher
//! plugin (or `vault-runner-ctl`) sends a `match` request for every query
//! change and a `run` request when the user picks a match or an action.
//!
//! Secret values never cross the socket: `run` copies them to the clipboard
//! inside the daemon.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traits::{BackendError, ClipboardError, UnlockFailure};
use crate::types::{Action, Match};

/// Match id of the synthetic "Unlock password manager" entry.
pub const UNLOCK_MATCH_ID: &str = "_unlock_";

/// A request from the launcher to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Search entries for a query.
    Match {
        /// Raw query text as typed by the user.
        query: String,
    },

    /// Run an action on a match.
    Run {
        /// The match (entry) id.
        match_id: String,

        /// The action id; empty runs the default action.
        #[serde(default)]
        action_id: String,
    },

    /// List the actions the launcher may offer on matches.
    Actions,

    /// Report the session state.
    Status,

    /// Lock the backend.
    Lock,

    /// Sync the backend with its server.
    Sync,

    /// Ping the daemon (health check).
    Ping,

    /// Ask the daemon to exit and release its socket.
    Shutdown,
}

/// A response from the daemon to the launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Result of a match request.
    Matches {
        /// Ranked matches, best first.
        matches: Vec<MatchDescriptor>,

        /// Why the result is empty, when it is empty because of a failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<Failure>,
    },

    /// The action list.
    Actions {
        /// Actions in display order.
        actions: Vec<ActionDescriptor>,
    },

    /// A run request completed.
    Done,

    /// Session state.
    Status {
        /// `locked`, `unlocking`, `unlocked` or `failed: <reason>`.
        state: String,

        /// Backend name.
        backend: String,
    },

    /// The backend was locked.
    Locked,

    /// The backend was synced.
    Synced,

    /// Response to a ping request.
    Pong {
        /// Process id of the answering daemon.
        pid: u32,
    },

    /// The daemon is exiting.
    ShuttingDown,

    /// An error response.
    Error {
        /// The error code.
        code: ErrorCode,

        /// A human-readable error message.
        message: String,
    },
}

/// Failure indicator attached to an empty match result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// The error code.
    pub code: ErrorCode,
    /// A human-readable error message.
    pub message: String,
}

/// One match as presented to the launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDescriptor {
    /// Entry id, passed back in `run`.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Secondary display text (the username, when listed).
    pub subtitle: String,
    /// Icon name.
    pub icon: String,
    /// Launcher match type: 100 exact, 70 possible, 30 helper.
    pub match_type: u8,
    /// Relevance (0-1).
    pub relevance: f64,
    /// Actions offered for this match.
    pub actions: Vec<ActionDescriptor>,
}

impl MatchDescriptor {
    /// Describe a ranked match.
    pub fn from_match(m: &Match, icon: &str) -> Self {
        Self {
            id: m.entry.id.clone(),
            title: m.entry.title.clone(),
            subtitle: m.entry.username.clone().unwrap_or_default(),
            icon: icon.to_string(),
            match_type: m.kind.match_type(),
            relevance: m.relevance,
            actions: m
                .actions
                .iter()
                .map(|a| ActionDescriptor::from_action(a, icon))
                .collect(),
        }
    }

    /// The synthetic entry offered while the backend is locked.
    pub fn unlock_item(icon: &str) -> Self {
        Self {
            id: UNLOCK_MATCH_ID.to_string(),
            title: "Unlock password manager".to_string(),
            subtitle: String::new(),
            icon: icon.to_string(),
            match_type: 100,
            relevance: 1.0,
            actions: Vec::new(),
        }
    }
}

/// One action as presented to the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Action id, passed back in `run`.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Icon name.
    pub icon: String,
}

impl ActionDescriptor {
    /// Describe an action.
    pub fn from_action(action: &Action, icon: &str) -> Self {
        Self {
            id: action.id.to_string(),
            label: action.label.to_string(),
            icon: icon.to_string(),
        }
    }
}

/// Error codes for protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid request format.
    InvalidRequest,

    /// Internal daemon error.
    InternalError,

    /// Daemon is shutting down.
    ShuttingDown,

    /// The vault tool or service cannot be reached.
    BackendUnavailable,

    /// The vault is locked.
    BackendLocked,

    /// No entry with the requested id.
    EntryNotFound,

    /// The entry lacks the requested field.
    FieldNotFound,

    /// Unknown action id.
    UnknownAction,

    /// The user cancelled the unlock or the password was rejected.
    UnlockDenied,

    /// The unlock did not finish in time.
    UnlockTimeout,

    /// The clipboard cannot be reached.
    ClipboardUnavailable,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidRequest => write!(f, "invalid_request"),
            ErrorCode::InternalError => write!(f, "internal_error"),
            ErrorCode::ShuttingDown => write!(f, "shutting_down"),
            ErrorCode::BackendUnavailable => write!(f, "backend_unavailable"),
            ErrorCode::BackendLocked => write!(f, "backend_locked"),
            ErrorCode::EntryNotFound => write!(f, "entry_not_found"),
            ErrorCode::FieldNotFound => write!(f, "field_not_found"),
            ErrorCode::UnknownAction => write!(f, "unknown_action"),
            ErrorCode::UnlockDenied => write!(f, "unlock_denied"),
            ErrorCode::UnlockTimeout => write!(f, "unlock_timeout"),
            ErrorCode::ClipboardUnavailable => write!(f, "clipboard_unavailable"),
        }
    }
}

impl From<&BackendError> for ErrorCode {
    fn from(err: &BackendError) -> Self {
        match err {
            BackendError::Unavailable(_) => ErrorCode::BackendUnavailable,
            BackendError::EntryNotFound(_) => ErrorCode::EntryNotFound,
            BackendError::FieldNotFound { .. } => ErrorCode::FieldNotFound,
            BackendError::Locked => ErrorCode::BackendLocked,
        }
    }
}

impl From<&UnlockFailure> for ErrorCode {
    fn from(err: &UnlockFailure) -> Self {
        match err {
            UnlockFailure::Denied(_) => ErrorCode::UnlockDenied,
            UnlockFailure::Timeout(_) => ErrorCode::UnlockTimeout,
            UnlockFailure::Backend(_) => ErrorCode::BackendUnavailable,
        }
    }
}

impl From<&ClipboardError> for ErrorCode {
    fn from(_: &ClipboardError) -> Self {
        ErrorCode::ClipboardUnavailable
    }
}

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read/write to the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Received an invalid message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,
}

impl Request {
    /// Parse a request from a JSON string.
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(ProtocolError::Serialization)
    }

    /// Serialize the request to a JSON string with newline.
    pub fn to_json_line(&self) -> Result<String, ProtocolError> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}

impl Response {
    /// Parse a response from a JSON string.
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(ProtocolError::Serialization)
    }

    /// Serialize the response to a JSON string with newline.
    pub fn to_json_line(&self) -> Result<String, ProtocolError> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Create an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a match result.
    pub fn matches(matches: Vec<MatchDescriptor>, failure: Option<Failure>) -> Self {
        Response::Matches { matches, failure }
    }
}

/// Returns the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/vault-runner/socket` if available,
/// otherwise falls back to `/tmp/vault-runner-$UID/socket`.
pub fn default_socket_path() -> PathBuf {
    if let Some(runtime_dir) = dirs::runtime_dir() {
        runtime_dir.join("vault-runner").join("socket")
    } else {
        // SAFETY: getuid() is always safe to call
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/vault-runner-{}/socket", uid))
    }
}
