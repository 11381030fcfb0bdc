//! Mock implementations for testing.
//!
//! This module provides configurable in-memory implementations of
//! [`VaultBackend`], [`UnlockPrompt`] and [`ClipboardProvider`] that can be
//! used in tests without a vault tool, a keyring daemon or a display server.
//! Each mock counts how often it was called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::traits::{
    BackendError, BoxFuture, ClipboardError, ClipboardProvider, PromptError, UnlockFailure,
    UnlockPrompt, VaultBackend,
};
use crate::types::{Entry, Field, PromptRequest};

struct StoredEntry {
    entry: Entry,
    values: HashMap<Field, String>,
}

/// An in-memory vault.
///
/// By default the vault is unlocked. [`MockBackend::locked_with_password`]
/// makes it start locked and accept only the given master password, which
/// it asks for through the prompt passed to `unlock`.
///
/// # Example
///
/// ```
/// use vault_runner_core::mock::MockBackend;
/// use vault_runner_core::types::{Entry, Field};
///
/// let backend = MockBackend::new()
///     .with_entry(
///         Entry::new("1", "GitHub").with_field(Field::Password),
///         &[(Field::Password, "hunter2")],
///     )
///     .locked_with_password("master");
/// assert!(backend.is_locked_now());
/// ```
pub struct MockBackend {
    entries: Mutex<Vec<StoredEntry>>,
    locked: AtomicBool,
    unavailable: AtomicBool,
    master_password: Option<String>,
    unlock_delay: Option<Duration>,
    list_delay: Mutex<Option<Duration>>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    unlock_calls: AtomicUsize,
    sync_calls: AtomicUsize,
}

impl MockBackend {
    /// Create an empty, unlocked vault.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            locked: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            master_password: None,
            unlock_delay: None,
            list_delay: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            unlock_calls: AtomicUsize::new(0),
            sync_calls: AtomicUsize::new(0),
        }
    }

    /// Add an entry with its field values.
    pub fn with_entry(self, entry: Entry, values: &[(Field, &str)]) -> Self {
        self.insert(entry, values);
        self
    }

    /// Start locked; `unlock` prompts and accepts only `password`.
    pub fn locked_with_password(mut self, password: impl Into<String>) -> Self {
        self.master_password = Some(password.into());
        self.locked.store(true, Ordering::SeqCst);
        self
    }

    /// Delay `unlock` (after the prompt answered).
    pub fn with_unlock_delay(mut self, delay: Duration) -> Self {
        self.unlock_delay = Some(delay);
        self
    }

    /// Delay every `list_entries` call.
    pub fn set_list_delay(&self, delay: Option<Duration>) {
        *self.list_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Add or replace an entry.
    pub fn insert(&self, entry: Entry, values: &[(Field, &str)]) {
        let values = values
            .iter()
            .map(|(field, value)| (*field, value.to_string()))
            .collect();
        let mut entries = self.entries();
        entries.retain(|stored| stored.entry.id != entry.id);
        entries.push(StoredEntry { entry, values });
    }

    /// Delete an entry, as if removed from another device.
    pub fn remove(&self, entry_id: &str) {
        self.entries().retain(|stored| stored.entry.id != entry_id);
    }

    /// Lock the vault, as if its own timeout expired.
    pub fn lock_now(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    /// Unlock the vault without prompting, as if unlocked from another tool.
    pub fn unlock_now(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    /// Make every call fail with `BackendError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns whether the vault is locked right now.
    pub fn is_locked_now(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Number of `list_entries` calls.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_field` calls.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of `unlock` calls.
    pub fn unlock_calls(&self) -> usize {
        self.unlock_calls.load(Ordering::SeqCst)
    }

    /// Number of `sync` calls.
    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<StoredEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_usable(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("mock backend offline".to_string()));
        }
        if self.is_locked_now() {
            return Err(BackendError::Locked);
        }
        Ok(())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn list_entries(&self) -> BoxFuture<'_, Result<Vec<Entry>, BackendError>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap_or_else(PoisonError::into_inner);

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.check_usable()?;
            Ok(self
                .entries()
                .iter()
                .map(|stored| stored.entry.clone())
                .collect())
        })
    }

    fn fetch_field<'a>(
        &'a self,
        entry_id: &'a str,
        field: Field,
    ) -> BoxFuture<'a, Result<SecretString, BackendError>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        Box::pin(async move {
            self.check_usable()?;
            let entries = self.entries();
            let stored = entries
                .iter()
                .find(|stored| stored.entry.id == entry_id)
                .ok_or_else(|| BackendError::EntryNotFound(entry_id.to_string()))?;
            stored
                .values
                .get(&field)
                .map(|value| SecretString::from(value.as_str()))
                .ok_or_else(|| BackendError::FieldNotFound {
                    entry: entry_id.to_string(),
                    field,
                })
        })
    }

    fn is_locked(&self) -> BoxFuture<'_, Result<bool, BackendError>> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("mock backend offline".to_string()));
            }
            Ok(self.is_locked_now())
        })
    }

    fn unlock<'a>(
        &'a self,
        prompt: &'a dyn UnlockPrompt,
    ) -> BoxFuture<'a, Result<(), UnlockFailure>> {
        self.unlock_calls.fetch_add(1, Ordering::SeqCst);

        Box::pin(async move {
            let password = prompt
                .prompt(PromptRequest::new("mock", "Unlock your password manager"))
                .await?;

            if let Some(delay) = self.unlock_delay {
                tokio::time::sleep(delay).await;
            }

            match &self.master_password {
                Some(expected) if expected.as_str() != password.expose_secret() => Err(
                    UnlockFailure::Denied("invalid master password".to_string()),
                ),
                _ => {
                    self.unlock_now();
                    Ok(())
                }
            }
        })
    }

    fn sync(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { self.check_usable() })
    }

    fn lock(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            self.lock_now();
            Ok(())
        })
    }
}

/// A mock unlock prompt for testing.
///
/// # Example
///
/// ```
/// use vault_runner_core::mock::MockPrompt;
///
/// // Create a mock that returns a specific password
/// let mock = MockPrompt::with_password("test-password");
///
/// // Or create one that simulates cancellation
/// let mock_cancel = MockPrompt::cancelled();
/// ```
pub struct MockPrompt {
    response: Result<String, PromptError>,
    call_count: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockPrompt {
    /// Create a mock that returns the given password.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self::with_result(Ok(password.into()))
    }

    /// Create a mock that simulates user cancellation.
    pub fn cancelled() -> Self {
        Self::with_result(Err(PromptError::Cancelled))
    }

    /// Create a mock that simulates timeout.
    pub fn timeout(seconds: u64) -> Self {
        Self::with_result(Err(PromptError::Timeout(seconds)))
    }

    /// Create a mock that returns an error.
    pub fn with_error(error: PromptError) -> Self {
        Self::with_result(Err(error))
    }

    fn with_result(response: Result<String, PromptError>) -> Self {
        Self {
            response,
            call_count: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Add a delay before responding.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the number of times prompt was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get a clone of the call counter for external tracking.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.call_count)
    }
}

impl Default for MockPrompt {
    fn default() -> Self {
        Self::with_password("mock-password")
    }
}

impl UnlockPrompt for MockPrompt {
    fn prompt(&self, _request: PromptRequest) -> BoxFuture<'_, Result<SecretString, PromptError>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let response = self.response.clone();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            response.map(SecretString::from)
        })
    }
}

/// An in-memory clipboard.
#[derive(Default)]
pub struct MemoryClipboard {
    content: Mutex<Option<String>>,
    unavailable: AtomicBool,
    set_calls: AtomicUsize,
    clear_calls: AtomicUsize,
}

impl MemoryClipboard {
    /// Create an empty clipboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content.
    pub fn content(&self) -> Option<String> {
        self.content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Simulate another application (or the user) copying text.
    pub fn user_copy(&self, text: &str) {
        *self.content.lock().unwrap_or_else(PoisonError::into_inner) = Some(text.to_string());
    }

    /// Make every call fail with `ClipboardError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `set_text` calls.
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Number of `clear` calls.
    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ClipboardError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClipboardError::Unavailable("no display".to_string()));
        }
        Ok(())
    }
}

impl ClipboardProvider for MemoryClipboard {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        self.check()?;
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.user_copy(text);
        Ok(())
    }

    fn get_text(&self) -> Result<Option<String>, ClipboardError> {
        self.check()?;
        Ok(self.content())
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        self.check()?;
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        *self.content.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
