//! Clipboard sink with auto-clear.
//!
//! [`ClipboardSink`] writes a fetched value to the clipboard and, for
//! sensitive fields, schedules a clear. The clear only happens if the
//! clipboard still holds the value that was written, so text the user copied
//! in the meantime is left alone. A new copy cancels the pending clear.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::traits::{ClipboardError, ClipboardProvider};

/// Writes values to a clipboard and clears sensitive ones later.
pub struct ClipboardSink {
    provider: Arc<dyn ClipboardProvider>,
    clear_after: Option<Duration>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ClipboardSink {
    /// Create a sink. `clear_after = None` disables auto-clear.
    pub fn new(provider: Arc<dyn ClipboardProvider>, clear_after: Option<Duration>) -> Self {
        Self {
            provider,
            clear_after,
            pending: Mutex::new(None),
        }
    }

    /// Copy a value. With `auto_clear`, schedule a conditional clear.
    ///
    /// A pending clear is only cancelled once the new value is on the
    /// clipboard; a failed write leaves it scheduled.
    pub async fn copy(&self, value: SecretString, auto_clear: bool) -> Result<(), ClipboardError> {
        let provider = Arc::clone(&self.provider);
        let value = tokio::task::spawn_blocking(move || {
            provider.set_text(value.expose_secret()).map(|()| value)
        })
        .await
        .map_err(|e| ClipboardError::Unavailable(format!("clipboard task failed: {}", e)))??;

        self.cancel_pending();
        match (auto_clear, self.clear_after) {
            (true, Some(delay)) => {
                debug!(delay_secs = delay.as_secs(), "Scheduling clipboard clear");
                let handle = tokio::spawn(clear_later(Arc::clone(&self.provider), value, delay));
                *self.lock_pending() = Some(handle);
            }
            _ => debug!("Copied without auto-clear"),
        }
        Ok(())
    }

    /// Returns whether a clear is scheduled.
    pub fn has_pending_clear(&self) -> bool {
        self.lock_pending()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self.lock_pending().take() {
            if !handle.is_finished() {
                debug!("Cancelling pending clipboard clear");
            }
            handle.abort();
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ClipboardSink {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

async fn clear_later(provider: Arc<dyn ClipboardProvider>, value: SecretString, delay: Duration) {
    tokio::time::sleep(delay).await;
    let result =
        tokio::task::spawn_blocking(move || clear_if_unchanged(provider.as_ref(), &value)).await;
    match result {
        Ok(Ok(true)) => info!("Clipboard cleared"),
        Ok(Ok(false)) => debug!("Clipboard changed since copy, leaving it"),
        Ok(Err(e)) => warn!(error = %e, "Failed to clear clipboard"),
        Err(e) => warn!(error = %e, "Clipboard clear task failed"),
    }
}

/// Clear the clipboard if it still holds `expected`.
///
/// Returns whether the clipboard was cleared.
pub fn clear_if_unchanged(
    provider: &dyn ClipboardProvider,
    expected: &SecretString,
) -> Result<bool, ClipboardError> {
    let mut current = match provider.get_text()? {
        Some(text) => text,
        None => return Ok(false),
    };
    let unchanged = current == expected.expose_secret();
    current.zeroize();

    if unchanged {
        provider.clear()?;
    }
    Ok(unchanged)
}
