//! Trait definitions for pluggable components.
//!
//! These traits define the interfaces for:
//! - Vault backends (CLI tools, Secret Service)
//! - Unlock prompting (dialog command, terminal)
//! - Clipboard access
//! - Socket provisioning
//!
//! By using traits, the session and the runner can be tested with mock
//! implementations and backends can be selected from configuration.

use std::future::Future;
use std::pin::Pin;

use secrecy::SecretString;
use thiserror::Error;
use tokio::net::UnixListener;

use crate::types::{Entry, Field, PromptRequest};

/// A boxed, sendable future borrowing from `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type for backend operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend tool or service cannot be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// No entry with the given identifier exists.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// The entry exists but does not carry the requested field.
    #[error("entry {entry} has no {field}")]
    FieldNotFound { entry: String, field: Field },

    /// The backend refused the operation because it is locked.
    #[error("backend is locked")]
    Locked,
}

/// Why an unlock attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnlockFailure {
    /// The user cancelled, or the backend rejected the credentials.
    #[error("unlock denied: {0}")]
    Denied(String),

    /// The attempt did not finish in time.
    #[error("unlock timed out after {0} seconds")]
    Timeout(u64),

    /// The unlock could not be carried out at all.
    #[error("unlock failed: {0}")]
    Backend(String),
}

/// Error type for prompt operations.
#[derive(Debug, Clone, Error)]
pub enum PromptError {
    /// User cancelled the prompt.
    #[error("prompt cancelled by user")]
    Cancelled,

    /// Prompt timed out.
    #[error("prompt timed out after {0} seconds")]
    Timeout(u64),

    /// The prompt program could not be started.
    #[error("prompt unavailable: {0}")]
    Unavailable(String),

    /// Generic UI error.
    #[error("UI error: {0}")]
    UiError(String),
}

impl From<PromptError> for UnlockFailure {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::Cancelled => UnlockFailure::Denied("unlock prompt cancelled".to_string()),
            PromptError::Timeout(secs) => UnlockFailure::Timeout(secs),
            other => UnlockFailure::Backend(other.to_string()),
        }
    }
}

/// Error type for clipboard operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipboardError {
    /// The system clipboard cannot be reached.
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
}

/// Error type for socket provider operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Failed to bind to the socket.
    #[error("failed to bind socket: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Socket path is invalid.
    #[error("invalid socket path: {0}")]
    InvalidPath(String),

    /// Failed to create the socket directory.
    #[error("failed to create socket directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),
}

/// A password store the runner can search and copy from.
///
/// Implementations wrap one concrete store. All operations may be called
/// concurrently from different connections.
///
/// `list_entries` and `fetch_field` return [`BackendError::Locked`] when the
/// store is locked; the session reacts to that by unlocking and retrying
/// once. Unlocking is only ever started by the session, never by a backend
/// on its own.
pub trait VaultBackend: Send + Sync {
    /// Short backend name for logs and status output.
    fn name(&self) -> &'static str;

    /// List all entries. Entries carry no secret values.
    fn list_entries(&self) -> BoxFuture<'_, Result<Vec<Entry>, BackendError>>;

    /// Fetch one field of an entry.
    fn fetch_field<'a>(
        &'a self,
        entry_id: &'a str,
        field: Field,
    ) -> BoxFuture<'a, Result<SecretString, BackendError>>;

    /// Ask the store whether it is currently locked. Never prompts.
    fn is_locked(&self) -> BoxFuture<'_, Result<bool, BackendError>>;

    /// Unlock the store, asking the user through `prompt` when the store
    /// needs a master password from us.
    fn unlock<'a>(&'a self, prompt: &'a dyn UnlockPrompt)
        -> BoxFuture<'a, Result<(), UnlockFailure>>;

    /// Pull remote changes into the local store.
    fn sync(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async { Ok(()) })
    }

    /// Lock the store.
    fn lock(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Trait for unlock prompt implementations.
///
/// This trait abstracts the UI layer, allowing different implementations:
/// - An external dialog command (kdialog, zenity)
/// - Terminal input (rpassword) for headless use
/// - Mock for testing
pub trait UnlockPrompt: Send + Sync {
    /// Ask the user for a master password.
    ///
    /// # Errors
    ///
    /// Returns `PromptError::Cancelled` if the user cancels.
    /// Returns `PromptError::Timeout` if the prompt times out.
    fn prompt(&self, request: PromptRequest) -> BoxFuture<'_, Result<SecretString, PromptError>>;
}

/// Blocking access to a text clipboard.
///
/// Implementations are called from blocking threads.
pub trait ClipboardProvider: Send + Sync {
    /// Replace the clipboard content.
    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;

    /// Current text content, `None` when the clipboard holds no text.
    fn get_text(&self) -> Result<Option<String>, ClipboardError>;

    /// Empty the clipboard.
    fn clear(&self) -> Result<(), ClipboardError>;
}

/// Trait for socket provider implementations.
///
/// This trait abstracts socket creation so the daemon can be pointed at
/// any path, including temporary ones in tests.
pub trait SocketProvider: Send + Sync {
    /// Create and return a Unix socket listener.
    fn listen(&self) -> BoxFuture<'_, Result<UnixListener, SocketError>>;

    /// Return the socket path (for logging/debugging).
    fn socket_path(&self) -> Option<&std::path::Path> {
        None
    }

    /// Remove whatever `listen` left on the filesystem.
    fn release(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_error_display() {
        assert_eq!(
            PromptError::Cancelled.to_string(),
            "prompt cancelled by user"
        );
        assert_eq!(
            PromptError::Timeout(30).to_string(),
            "prompt timed out after 30 seconds"
        );
    }

    #[test]
    fn prompt_error_maps_to_unlock_failure() {
        assert!(matches!(
            UnlockFailure::from(PromptError::Cancelled),
            UnlockFailure::Denied(_)
        ));
        assert_eq!(
            UnlockFailure::from(PromptError::Timeout(60)),
            UnlockFailure::Timeout(60)
        );
        assert!(matches!(
            UnlockFailure::from(PromptError::Unavailable("kdialog".into())),
            UnlockFailure::Backend(_)
        ));
    }

    #[test]
    fn backend_error_display() {
        let err = BackendError::FieldNotFound {
            entry: "abc".into(),
            field: Field::Totp,
        };
        assert_eq!(err.to_string(), "entry abc has no totp");
        assert_eq!(BackendError::Locked.to_string(), "backend is locked");
    }

    #[tokio::test]
    async fn default_sync_and_lock_are_noops() {
        struct Empty;

        impl VaultBackend for Empty {
            fn name(&self) -> &'static str {
                "empty"
            }
            fn list_entries(&self) -> BoxFuture<'_, Result<Vec<Entry>, BackendError>> {
                Box::pin(async { Ok(Vec::new()) })
            }
            fn fetch_field<'a>(
                &'a self,
                entry_id: &'a str,
                _field: Field,
            ) -> BoxFuture<'a, Result<SecretString, BackendError>> {
                Box::pin(async move { Err(BackendError::EntryNotFound(entry_id.to_string())) })
            }
            fn is_locked(&self) -> BoxFuture<'_, Result<bool, BackendError>> {
                Box::pin(async { Ok(false) })
            }
            fn unlock<'a>(
                &'a self,
                _prompt: &'a dyn UnlockPrompt,
            ) -> BoxFuture<'a, Result<(), UnlockFailure>> {
                Box::pin(async { Ok(()) })
            }
        }

        let backend = Empty;
        assert!(backend.sync().await.is_ok());
        assert!(backend.lock().await.is_ok());
    }
}
