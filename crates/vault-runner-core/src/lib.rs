//! Core types and logic for vault-runner.
//!
//! vault-runner answers launcher queries with entries from a password store
//! and copies the chosen field to the clipboard. This crate holds everything
//! that does not touch a concrete vault tool, display server or socket, so it
//! can be tested without any of them.
//!
//! # Modules
//!
//! - [`types`]: Core data types (`Entry`, `Field`, `Match`, `SessionState`)
//! - [`traits`]: Pluggable component traits (`VaultBackend`, `UnlockPrompt`, `ClipboardProvider`, `SocketProvider`)
//! - [`matcher`]: Query matching and ranking
//! - [`session`]: Lock state tracking and single-flight unlock
//! - [`clipboard`]: Clipboard sink with auto-clear
//! - [`protocol`]: IPC protocol types (`Request`, `Response`, `ErrorCode`)
//! - [`config`]: TOML configuration
//! - [`mock`]: In-memory backend, prompt and clipboard for tests
//!
//! # Example
//!
//! ```
//! use vault_runner_core::matcher::Matcher;
//! use vault_runner_core::types::{Entry, Field};
//!
//! let entries = vec![
//!     Entry::new("1", "Paypal").with_field(Field::Password),
//!     Entry::new("2", "Company Payroll").with_field(Field::Password),
//! ];
//!
//! let matches = Matcher::default().find("pay", &entries);
//! assert_eq!(matches[0].entry.title, "Paypal");
//! assert_eq!(matches[1].entry.title, "Company Payroll");
//! ```

pub mod clipboard;
pub mod config;
pub mod matcher;
pub mod mock;
pub mod protocol;
pub mod session;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root for convenience
pub use clipboard::ClipboardSink;
pub use config::{BackendKind, Config, ConfigError, PromptKind};
pub use matcher::{MatchSettings, Matcher};
pub use protocol::{
    default_socket_path, ActionDescriptor, ErrorCode, Failure, MatchDescriptor, ProtocolError,
    Request, Response, UNLOCK_MATCH_ID,
};
pub use session::{Session, SessionError};
pub use traits::{
    BackendError, BoxFuture, ClipboardError, ClipboardProvider, PromptError, SocketError,
    SocketProvider, UnlockFailure, UnlockPrompt, VaultBackend,
};
pub use types::{
    dedup_entries, Action, Entry, Field, Match, MatchKind, PromptRequest, SessionState,
};
