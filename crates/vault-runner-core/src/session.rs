//! Backend lock state tracking.
//!
//! The [`Session`] wraps a backend and makes sure it is unlocked before it
//! is used, starting at most one unlock attempt at a time. Callers that
//! arrive while an attempt is running wait for its outcome instead of
//! starting another.
//!
//! # State machine
//!
//! ```text
//!              query                    success
//!   Locked ─────────────▶ Unlocking ─────────────▶ Unlocked
//!     ▲   ▲                  │                        │
//!     │   └──────────────────┼────────────────────────┘
//!     │      denied/timeout  ▼          backend reports locked
//!     └──────────────── Failed(reason)
//!            next query
//! ```
//!
//! The attempt runs on its own task, so it runs to completion even if the
//! request that started it is dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::protocol::ErrorCode;
use crate::traits::{BackendError, UnlockFailure, UnlockPrompt, VaultBackend};
use crate::types::{Entry, Field, SessionState};

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The backend could not be unlocked.
    #[error(transparent)]
    Unlock(#[from] UnlockFailure),
}

impl From<&SessionError> for ErrorCode {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Backend(e) => ErrorCode::from(e),
            SessionError::Unlock(e) => ErrorCode::from(e),
        }
    }
}

type Outcome = Option<Result<(), SessionError>>;

enum Phase {
    Locked,
    Unlocking(watch::Receiver<Outcome>),
    Unlocked,
    Failed(UnlockFailure),
}

/// Lock state and unlock coordination for one backend.
pub struct Session {
    backend: Arc<dyn VaultBackend>,
    prompt: Arc<dyn UnlockPrompt>,
    unlock_timeout: Duration,
    phase: Arc<Mutex<Phase>>,
}

impl Session {
    /// Create a session. The initial state is `Locked`.
    pub fn new(
        backend: Arc<dyn VaultBackend>,
        prompt: Arc<dyn UnlockPrompt>,
        unlock_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            prompt,
            unlock_timeout,
            phase: Arc::new(Mutex::new(Phase::Locked)),
        }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &Arc<dyn VaultBackend> {
        &self.backend
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        match &*self.lock_phase() {
            Phase::Locked => SessionState::Locked,
            Phase::Unlocking(_) => SessionState::Unlocking,
            Phase::Unlocked => SessionState::Unlocked,
            Phase::Failed(reason) => SessionState::Failed(reason.clone()),
        }
    }

    /// Returns whether the session is known to be unlocked.
    pub fn is_unlocked(&self) -> bool {
        matches!(*self.lock_phase(), Phase::Unlocked)
    }

    /// Ask the backend whether it is already unlocked, without prompting.
    ///
    /// Moves `Locked`/`Failed` to `Unlocked` when the backend reports it is
    /// usable (e.g. the user unlocked it from another tool).
    pub async fn refresh(&self) -> SessionState {
        if matches!(*self.lock_phase(), Phase::Locked | Phase::Failed(_)) {
            match self.backend.is_locked().await {
                Ok(false) => {
                    let mut phase = self.lock_phase();
                    if matches!(*phase, Phase::Locked | Phase::Failed(_)) {
                        debug!(backend = self.backend.name(), "Backend already unlocked");
                        *phase = Phase::Unlocked;
                    }
                }
                Ok(true) => {}
                Err(e) => debug!(error = %e, "Lock state check failed"),
            }
        }
        self.state()
    }

    /// Make sure the backend is unlocked, starting or joining an unlock.
    pub async fn ensure_unlocked(&self) -> Result<(), SessionError> {
        let mut outcome = match self.join_or_start() {
            Some(rx) => rx,
            None => return Ok(()),
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| {
            Err(UnlockFailure::Backend("unlock task ended without a result".to_string()).into())
        })
    }

    /// List entries, unlocking first and once more if the backend relocked.
    pub async fn list_entries(&self) -> Result<Vec<Entry>, SessionError> {
        self.ensure_unlocked().await?;
        match self.backend.list_entries().await {
            Err(BackendError::Locked) => {
                self.mark_locked();
                self.ensure_unlocked().await?;
                Ok(self.backend.list_entries().await?)
            }
            other => Ok(other?),
        }
    }

    /// Fetch a field, unlocking first and once more if the backend relocked.
    pub async fn fetch_field(
        &self,
        entry_id: &str,
        field: Field,
    ) -> Result<SecretString, SessionError> {
        self.ensure_unlocked().await?;
        match self.backend.fetch_field(entry_id, field).await {
            Err(BackendError::Locked) => {
                self.mark_locked();
                self.ensure_unlocked().await?;
                Ok(self.backend.fetch_field(entry_id, field).await?)
            }
            other => Ok(other?),
        }
    }

    /// Sync the backend if it is unlocked; does nothing otherwise.
    pub async fn sync(&self) -> Result<(), SessionError> {
        if !self.is_unlocked() {
            debug!("Skipping sync, session not unlocked");
            return Ok(());
        }
        match self.backend.sync().await {
            Err(BackendError::Locked) => {
                self.mark_locked();
                Err(BackendError::Locked.into())
            }
            other => Ok(other?),
        }
    }

    /// Lock the backend and return to `Locked`.
    pub async fn lock(&self) -> Result<(), SessionError> {
        self.backend.lock().await?;
        let mut phase = self.lock_phase();
        if !matches!(*phase, Phase::Unlocking(_)) {
            *phase = Phase::Locked;
        }
        info!(backend = self.backend.name(), "Backend locked");
        Ok(())
    }

    /// Record that the backend reported itself locked.
    pub fn mark_locked(&self) {
        let mut phase = self.lock_phase();
        if matches!(*phase, Phase::Unlocked) {
            info!(backend = self.backend.name(), "Backend relocked");
            *phase = Phase::Locked;
        }
    }

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a receiver for the in-flight attempt, or `None` if unlocked.
    fn join_or_start(&self) -> Option<watch::Receiver<Outcome>> {
        let mut phase = self.lock_phase();
        match &*phase {
            Phase::Unlocked => None,
            Phase::Unlocking(rx) => {
                debug!("Joining in-flight unlock");
                Some(rx.clone())
            }
            Phase::Locked | Phase::Failed(_) => {
                let (tx, rx) = watch::channel(None);
                *phase = Phase::Unlocking(rx.clone());
                drop(phase);
                self.spawn_attempt(tx);
                Some(rx)
            }
        }
    }

    fn spawn_attempt(&self, tx: watch::Sender<Outcome>) {
        let backend = Arc::clone(&self.backend);
        let prompt = Arc::clone(&self.prompt);
        let phase = Arc::clone(&self.phase);
        let timeout = self.unlock_timeout;

        tokio::spawn(async move {
            let result = attempt_unlock(backend.as_ref(), prompt.as_ref(), timeout).await;
            {
                let mut phase = phase.lock().unwrap_or_else(PoisonError::into_inner);
                *phase = match &result {
                    Ok(()) => Phase::Unlocked,
                    Err(SessionError::Unlock(reason)) => Phase::Failed(reason.clone()),
                    Err(SessionError::Backend(_)) => Phase::Locked,
                };
            }
            tx.send_replace(Some(result));
        });
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .field("unlock_timeout", &self.unlock_timeout)
            .finish()
    }
}

async fn attempt_unlock(
    backend: &dyn VaultBackend,
    prompt: &dyn UnlockPrompt,
    timeout: Duration,
) -> Result<(), SessionError> {
    if !backend.is_locked().await? {
        debug!(backend = backend.name(), "Backend already unlocked");
        return Ok(());
    }

    info!(backend = backend.name(), "Backend locked, starting unlock");
    match tokio::time::timeout(timeout, backend.unlock(prompt)).await {
        Ok(Ok(())) => {
            info!(backend = backend.name(), "Backend unlocked");
            Ok(())
        }
        Ok(Err(reason)) => {
            warn!(backend = backend.name(), reason = %reason, "Unlock failed");
            Err(reason.into())
        }
        Err(_) => {
            warn!(
                backend = backend.name(),
                timeout_secs = timeout.as_secs(),
                "Unlock timed out"
            );
            Err(UnlockFailure::Timeout(timeout.as_secs()).into())
        }
    }
}
