//! Socket binding for the daemon.
//!
//! [`ManualSocketProvider`] binds a Unix socket at a fixed path, owner-only.
//! It remembers which socket file it created so that `release` never deletes
//! a socket a newer instance has bound at the same path in the meantime.

use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tokio::net::UnixListener;
use tracing::{debug, warn};
use vault_runner_core::{default_socket_path, BoxFuture, SocketError, SocketProvider};

/// Socket provider that binds a Unix socket at a path.
pub struct ManualSocketProvider {
    /// Path to the Unix socket.
    path: PathBuf,
    /// Device and inode of the socket file we bound.
    bound: Mutex<Option<(u64, u64)>>,
}

impl ManualSocketProvider {
    /// Create a new socket provider with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bound: Mutex::new(None),
        }
    }

    /// Bind the socket.
    async fn bind(&self) -> Result<UnixListener, SocketError> {
        if self.path.as_os_str().is_empty() {
            return Err(SocketError::InvalidPath("empty socket path".to_string()));
        }

        // Create parent directory if needed
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(parent)
                    .map_err(SocketError::DirectoryCreationFailed)?;
                debug!(path = %parent.display(), "Created socket directory");
            }
        }

        // Remove stale socket if present
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                SocketError::BindFailed(std::io::Error::other(format!(
                    "Failed to remove existing socket: {}",
                    e
                )))
            })?;
            debug!(path = %self.path.display(), "Removed stale socket");
        }

        let listener = UnixListener::bind(&self.path).map_err(SocketError::BindFailed)?;

        // Owner only
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&self.path, perms).map_err(|e| {
            SocketError::BindFailed(std::io::Error::other(format!(
                "Failed to set socket permissions: {}",
                e
            )))
        })?;

        let identity = std::fs::metadata(&self.path)
            .map(|meta| (meta.dev(), meta.ino()))
            .map_err(SocketError::BindFailed)?;
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity);

        debug!(path = %self.path.display(), "Socket bound successfully");
        Ok(listener)
    }
}

impl Default for ManualSocketProvider {
    fn default() -> Self {
        Self::new(default_socket_path())
    }
}

impl SocketProvider for ManualSocketProvider {
    fn listen(&self) -> BoxFuture<'_, Result<UnixListener, SocketError>> {
        Box::pin(self.bind())
    }

    fn socket_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn release(&self) {
        let Some(identity) = self.bound.lock().unwrap_or_else(PoisonError::into_inner).take()
        else {
            return;
        };

        match std::fs::metadata(&self.path) {
            Ok(meta) if (meta.dev(), meta.ino()) == identity => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove socket");
                } else {
                    debug!(path = %self.path.display(), "Removed socket");
                }
            }
            Ok(_) => debug!(
                path = %self.path.display(),
                "Socket path taken over by another instance, leaving it"
            ),
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_creates_socket() {
        let temp_dir = tempfile::tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let provider = ManualSocketProvider::new(&socket_path);
        let _listener = provider.listen().await.unwrap();

        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn bind_creates_private_parent_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let socket_path = temp_dir.path().join("subdir").join("test.sock");

        let provider = ManualSocketProvider::new(&socket_path);
        let _listener = provider.listen().await.unwrap();

        let parent = socket_path.parent().unwrap();
        let mode = std::fs::metadata(parent).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket() {
        let temp_dir = tempfile::tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let provider = ManualSocketProvider::new(&socket_path);
        let listener1 = provider.listen().await.unwrap();
        drop(listener1);

        let _listener2 = provider.listen().await.unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn socket_has_owner_only_permissions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let provider = ManualSocketProvider::new(&socket_path);
        let _listener = provider.listen().await.unwrap();

        let perms = std::fs::metadata(&socket_path).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn release_removes_own_socket() {
        let temp_dir = tempfile::tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let provider = ManualSocketProvider::new(&socket_path);
        let _listener = provider.listen().await.unwrap();
        provider.release();

        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn release_keeps_socket_of_newer_instance() {
        let temp_dir = tempfile::tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let old = ManualSocketProvider::new(&socket_path);
        let _old_listener = old.listen().await.unwrap();

        let new = ManualSocketProvider::new(&socket_path);
        let _new_listener = new.listen().await.unwrap();

        old.release();
        assert!(socket_path.exists());

        new.release();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn empty_path_is_invalid() {
        let provider = ManualSocketProvider::new("");
        assert!(matches!(
            provider.listen().await,
            Err(SocketError::InvalidPath(_))
        ));
    }

    #[test]
    fn default_uses_runtime_dir() {
        let provider = ManualSocketProvider::default();
        let path = provider.socket_path().unwrap();
        assert!(path.ends_with("socket"));
        assert!(path.to_string_lossy().contains("vault-runner"));
    }
}
