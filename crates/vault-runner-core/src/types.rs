//! Core types for vault-runner.
//!
//! This module contains the data structures shared by the backends, the
//! match engine and the session: credential entries, the fields they expose,
//! the actions offered for them and the session lock state.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::traits::UnlockFailure;

/// A named field of a credential entry.
///
/// Field values are never stored on an [`Entry`]; they are fetched from the
/// backend when an action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    /// The password (default action).
    Password,
    /// The login name.
    Username,
    /// A time-based one-time code.
    Totp,
}

impl Field {
    /// All fields, in the order their actions are offered.
    pub const ALL: [Field; 3] = [Field::Password, Field::Username, Field::Totp];

    /// Returns whether copies of this field should be auto-cleared.
    pub fn is_sensitive(&self) -> bool {
        match self {
            Field::Password => true,
            Field::Username => false,
            Field::Totp => true,
        }
    }

    /// The action identifier used on the wire (e.g. `copy-password`).
    pub fn action_id(&self) -> &'static str {
        match self {
            Field::Password => "copy-password",
            Field::Username => "copy-username",
            Field::Totp => "copy-totp",
        }
    }

    /// Human-readable action label.
    pub fn action_label(&self) -> &'static str {
        match self {
            Field::Password => "Copy password",
            Field::Username => "Copy username",
            Field::Totp => "Copy OTP",
        }
    }

    /// Resolve an action identifier back to its field.
    ///
    /// # Examples
    ///
    /// ```
    /// use vault_runner_core::types::Field;
    ///
    /// assert_eq!(Field::from_action_id("copy-username"), Some(Field::Username));
    /// assert_eq!(Field::from_action_id("launch-rocket"), None);
    /// ```
    pub fn from_action_id(action_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.action_id() == action_id)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Password => write!(f, "password"),
            Field::Username => write!(f, "username"),
            Field::Totp => write!(f, "totp"),
        }
    }
}

/// One credential record exposed by a backend.
///
/// An entry carries only metadata: its identifier, a display title, the
/// login name when the backend lists it without a secret fetch, secondary
/// search attributes (URIs, folder) and the set of fields that can be
/// fetched for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Backend-assigned identifier, unique within one listing.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Login name, if listed cheaply by the backend.
    pub username: Option<String>,
    /// Secondary search attributes.
    pub attributes: Vec<String>,
    fields: BTreeSet<Field>,
}

impl Entry {
    /// Create an entry with no fields.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            username: None,
            attributes: Vec::new(),
            fields: BTreeSet::new(),
        }
    }

    /// Mark a field as fetchable.
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.insert(field);
        self
    }

    /// Set the listed login name. Empty names are ignored.
    ///
    /// A listed username also makes the username field fetchable.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        let username = username.into();
        if !username.is_empty() {
            self.username = Some(username);
            self.fields.insert(Field::Username);
        }
        self
    }

    /// Add a secondary search attribute. Empty values and duplicates are ignored.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        if !attribute.is_empty() && !self.attributes.contains(&attribute) {
            self.attributes.push(attribute);
        }
        self
    }

    /// Fields that can be fetched for this entry, in action order.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.iter().copied()
    }

    /// Returns whether the given field can be fetched.
    pub fn has_field(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }
}

/// Drop entries whose identifier already appeared earlier in the listing.
///
/// Backends call this so identifiers are unique within one listing.
pub fn dedup_entries(entries: Vec<Entry>) -> Vec<Entry> {
    let mut seen = HashSet::new();
    let before = entries.len();
    let unique: Vec<Entry> = entries
        .into_iter()
        .filter(|entry| seen.insert(entry.id.clone()))
        .collect();
    if unique.len() != before {
        warn!(
            dropped = before - unique.len(),
            "Backend listed duplicate entry ids, keeping first occurrence"
        );
    }
    unique
}

/// An action offered for a matched entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    /// Wire identifier.
    pub id: &'static str,
    /// Field the action copies.
    pub field: Field,
    /// Human-readable label.
    pub label: &'static str,
}

impl Action {
    /// The copy action for a field.
    pub fn copy(field: Field) -> Self {
        Self {
            id: field.action_id(),
            field,
            label: field.action_label(),
        }
    }
}

/// How a query matched an entry. Declaration order is rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchKind {
    /// The title starts with the query.
    Prefix,
    /// The title contains the query.
    Substring,
    /// The username or a secondary attribute contains the query.
    Secondary,
}

impl MatchKind {
    /// Relevance reported to the launcher (0-1).
    pub fn relevance(&self) -> f64 {
        match self {
            MatchKind::Prefix => 1.0,
            MatchKind::Substring => 0.7,
            MatchKind::Secondary => 0.5,
        }
    }

    /// Launcher match type: exact (100), possible (70) or helper (30).
    pub fn match_type(&self) -> u8 {
        match self {
            MatchKind::Prefix => 100,
            MatchKind::Substring => 70,
            MatchKind::Secondary => 30,
        }
    }
}

/// An entry ranked against a query, with its available actions.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// The matched entry.
    pub entry: Entry,
    /// How the query matched.
    pub kind: MatchKind,
    /// Relevance score (0-1).
    pub relevance: f64,
    /// One copy action per field the entry exposes.
    pub actions: Vec<Action>,
}

impl Match {
    /// Build a match, synthesizing one action per exposed field.
    pub fn new(entry: Entry, kind: MatchKind) -> Self {
        let actions = entry.fields().map(Action::copy).collect();
        Self {
            entry,
            kind,
            relevance: kind.relevance(),
            actions,
        }
    }
}

/// Lock state of the backend as tracked by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not known to be unlocked (initial state).
    Locked,
    /// An unlock attempt is in flight.
    Unlocking,
    /// The backend is usable.
    Unlocked,
    /// The last unlock attempt failed; the next query retries.
    Failed(UnlockFailure),
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Locked => write!(f, "locked"),
            SessionState::Unlocking => write!(f, "unlocking"),
            SessionState::Unlocked => write!(f, "unlocked"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// What an unlock prompt is asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    /// Text shown to the user.
    pub message: String,
    /// Name of the backend being unlocked.
    pub backend: String,
}

impl PromptRequest {
    /// Create a prompt request for a backend.
    pub fn new(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            backend: backend.into(),
        }
    }
}
