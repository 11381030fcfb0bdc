//! Query and action handling for the launcher.
//!
//! [`Runner`] ties the session, the match engine and the clipboard sink
//! together. It answers the two launcher operations, `query` and `run`, and
//! the maintenance requests of the control client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use vault_runner_core::{
    Action, ActionDescriptor, ClipboardError, ClipboardSink, Entry, ErrorCode, Failure, Field,
    MatchDescriptor, Matcher, Session, SessionError, SessionState, UNLOCK_MATCH_ID,
};

/// Launcher-facing settings.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Prompt for unlock from a query; otherwise offer an unlock match.
    pub unlock_on_query: bool,
    /// Icon name for matches and actions.
    pub icon: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            unlock_on_query: true,
            icon: "changes-allow-symbolic".to_string(),
        }
    }
}

impl From<&vault_runner_core::config::RunnerConfig> for RunnerSettings {
    fn from(config: &vault_runner_core::config::RunnerConfig) -> Self {
        Self {
            unlock_on_query: config.unlock_on_query,
            icon: config.icon.clone(),
        }
    }
}

/// Result of a query: matches, or nothing plus the reason.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryOutcome {
    pub matches: Vec<MatchDescriptor>,
    pub failure: Option<Failure>,
}

impl QueryOutcome {
    fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            matches: Vec::new(),
            failure: Some(Failure {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Why a `run` did not copy anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Clipboard(#[from] ClipboardError),

    #[error("unknown action: {0}")]
    UnknownAction(String),
}

impl RunError {
    /// Protocol error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            RunError::Session(e) => ErrorCode::from(e),
            RunError::Clipboard(e) => ErrorCode::from(e),
            RunError::UnknownAction(_) => ErrorCode::UnknownAction,
        }
    }
}

/// Answers launcher queries and runs the chosen actions.
pub struct Runner {
    session: Arc<Session>,
    matcher: Matcher,
    clipboard: ClipboardSink,
    settings: RunnerSettings,
    query_seq: AtomicU64,
}

impl Runner {
    pub fn new(
        session: Arc<Session>,
        matcher: Matcher,
        clipboard: ClipboardSink,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            session,
            matcher,
            clipboard,
            settings,
            query_seq: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Match a query against the vault.
    ///
    /// Queries the match engine rejects never reach the backend. A query
    /// that a newer one overtook, either while waiting for the unlock or
    /// while listing, is answered with nothing.
    pub async fn query(&self, raw: &str) -> QueryOutcome {
        let Some(term) = self.matcher.search_term(raw) else {
            return QueryOutcome::default();
        };
        let seq = self.query_seq.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.settings.unlock_on_query && self.session.refresh().await != SessionState::Unlocked
        {
            debug!(seq, "Vault locked, offering unlock item");
            return QueryOutcome {
                matches: vec![MatchDescriptor::unlock_item(&self.settings.icon)],
                failure: None,
            };
        }

        let entries = match self.list_if_current(seq).await {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                debug!(seq, "Newer query arrived, result discarded");
                return QueryOutcome::default();
            }
            Err(e) => {
                warn!(seq, error = %e, "Query failed");
                return QueryOutcome::failed(ErrorCode::from(&e), e.to_string());
            }
        };

        let matches: Vec<MatchDescriptor> = self
            .matcher
            .rank(&term, &entries)
            .iter()
            .map(|m| MatchDescriptor::from_match(m, &self.settings.icon))
            .collect();
        debug!(seq, listed = entries.len(), matched = matches.len(), "Query answered");
        QueryOutcome {
            matches,
            failure: None,
        }
    }

    /// Unlock, then list unless query `seq` has been overtaken.
    async fn list_if_current(&self, seq: u64) -> Result<Option<Vec<Entry>>, SessionError> {
        self.session.ensure_unlocked().await?;
        if self.is_superseded(seq) {
            return Ok(None);
        }
        let entries = self.session.list_entries().await?;
        Ok((!self.is_superseded(seq)).then_some(entries))
    }

    fn is_superseded(&self, seq: u64) -> bool {
        self.query_seq.load(Ordering::SeqCst) != seq
    }

    /// Run an action on a match.
    ///
    /// The entry is fetched again by id; an empty `action_id` copies the
    /// password. `_unlock_` starts the unlock instead.
    pub async fn run(&self, match_id: &str, action_id: &str) -> Result<(), RunError> {
        if match_id == UNLOCK_MATCH_ID {
            info!("Unlock requested from launcher");
            self.session.ensure_unlocked().await?;
            return Ok(());
        }

        let field = if action_id.is_empty() {
            Field::Password
        } else {
            Field::from_action_id(action_id)
                .ok_or_else(|| RunError::UnknownAction(action_id.to_string()))?
        };

        let value = self.session.fetch_field(match_id, field).await?;
        self.clipboard.copy(value, field.is_sensitive()).await?;
        info!(entry = %match_id, %field, "Copied to clipboard");
        Ok(())
    }

    /// All actions the launcher may offer, in display order.
    pub fn actions(&self) -> Vec<ActionDescriptor> {
        Field::ALL
            .iter()
            .map(|field| ActionDescriptor::from_action(&Action::copy(*field), &self.settings.icon))
            .collect()
    }

    /// Current session state and backend name.
    pub async fn status(&self) -> (SessionState, &'static str) {
        let state = self.session.refresh().await;
        (state, self.session.backend().name())
    }

    pub async fn lock(&self) -> Result<(), SessionError> {
        self.session.lock().await
    }

    pub async fn sync(&self) -> Result<(), SessionError> {
        self.session.sync().await
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("session", &self.session)
            .field("matcher", &self.matcher)
            .field("settings", &self.settings)
            .finish()
    }
}
