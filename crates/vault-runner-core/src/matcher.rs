//! Query matching.
//!
//! Turns a raw launcher query and a backend listing into a short, ranked
//! list of matches. Title prefix hits rank first, then title substring hits,
//! then (when enabled) hits on the username or secondary attributes. Ties
//! keep the backend's order.

use std::collections::HashSet;

use crate::config::MatchingConfig;
use crate::types::{Entry, Match, MatchKind};

/// Settings for the match engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSettings {
    /// Queries with fewer characters are ignored.
    pub min_query_length: usize,
    /// Maximum number of matches returned; 0 means no limit.
    pub max_results: usize,
    /// Keyword a query must start with.
    pub trigger: Option<String>,
    /// Also search usernames and secondary attributes.
    pub match_secondary: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self::from(&MatchingConfig::default())
    }
}

impl From<&MatchingConfig> for MatchSettings {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            min_query_length: config.min_query_length,
            max_results: config.max_results,
            trigger: config.trigger.clone().filter(|t| !t.is_empty()),
            match_secondary: config.match_secondary,
        }
    }
}

/// The match engine.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    settings: MatchSettings,
}

impl Matcher {
    /// Create a matcher.
    pub fn new(settings: MatchSettings) -> Self {
        Self { settings }
    }

    /// The active settings.
    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Reduce a raw query to the search term.
    ///
    /// Strips the trigger keyword (queries without it are rejected), trims
    /// whitespace and applies the minimum length. Returns `None` when the
    /// query must not reach the backend at all.
    pub fn search_term(&self, raw: &str) -> Option<String> {
        let rest = match &self.settings.trigger {
            Some(trigger) => strip_prefix_ignore_case(raw, trigger)?,
            None => raw,
        };
        let term = rest.trim();
        if term.chars().count() < self.settings.min_query_length.max(1) {
            return None;
        }
        Some(term.to_string())
    }

    /// Match a raw query against a listing.
    pub fn find(&self, raw: &str, entries: &[Entry]) -> Vec<Match> {
        match self.search_term(raw) {
            Some(term) => self.rank(&term, entries),
            None => Vec::new(),
        }
    }

    /// Rank a listing against an already prepared search term.
    pub fn rank(&self, term: &str, entries: &[Entry]) -> Vec<Match> {
        let needle = term.to_lowercase();
        let mut seen = HashSet::new();

        let mut hits: Vec<(MatchKind, &Entry)> = entries
            .iter()
            .filter(|entry| seen.insert(entry.id.as_str()))
            .filter_map(|entry| self.classify(&needle, entry).map(|kind| (kind, entry)))
            .collect();

        // sort_by_key is stable, so backend order survives within a kind
        hits.sort_by_key(|(kind, _)| *kind);
        if self.settings.max_results > 0 {
            hits.truncate(self.settings.max_results);
        }

        hits.into_iter()
            .map(|(kind, entry)| Match::new(entry.clone(), kind))
            .collect()
    }

    fn classify(&self, needle: &str, entry: &Entry) -> Option<MatchKind> {
        let title = entry.title.to_lowercase();
        if title.starts_with(needle) {
            return Some(MatchKind::Prefix);
        }
        if title.contains(needle) {
            return Some(MatchKind::Substring);
        }
        if self.settings.match_secondary {
            let secondary = entry
                .username
                .iter()
                .chain(entry.attributes.iter())
                .any(|value| value.to_lowercase().contains(needle));
            if secondary {
                return Some(MatchKind::Secondary);
            }
        }
        None
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}
