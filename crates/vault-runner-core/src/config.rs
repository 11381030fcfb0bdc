//! Configuration types and loading for vault-runner.
//!
//! Configuration is loaded from `~/.config/vault-runner/config.toml`.
//!
//! # Error Handling
//!
//! - If the config file doesn't exist, default values are returned.
//! - If the config file exists but is invalid, an error is returned (fail fast).
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! kind = "rbw"                # bitwarden | rbw | secret-service
//! command_timeout = 10
//! sync_interval = 600         # 0 disables periodic sync
//!
//! [session]
//! unlock_timeout = 120
//!
//! [matching]
//! min_query_length = 3
//! max_results = 4
//! trigger = "pass "
//! match_secondary = false
//!
//! [clipboard]
//! clear_after = 5             # 0 disables auto-clear
//!
//! [prompt]
//! kind = "command"            # command | terminal
//! command = ["kdialog", "--password", "{message}"]
//! timeout = 60
//!
//! [runner]
//! unlock_on_query = true
//! icon = "changes-allow-symbolic"
//! takeover_timeout = 5
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Which password store to talk to.
    pub backend: BackendConfig,
    /// Unlock behavior.
    pub session: SessionConfig,
    /// Query matching.
    pub matching: MatchingConfig,
    /// Clipboard handling.
    pub clipboard: ClipboardConfig,
    /// Unlock prompt.
    pub prompt: PromptConfig,
    /// Launcher-facing behavior.
    pub runner: RunnerConfig,
}

/// The supported password stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// The official Bitwarden CLI (`bw`).
    #[default]
    Bitwarden,
    /// The unofficial Bitwarden client `rbw`.
    Rbw,
    /// The freedesktop Secret Service (KeePassXC, GNOME Keyring, KWallet).
    SecretService,
}

impl BackendKind {
    /// Executable used when `backend.program` is not set.
    pub fn default_program(&self) -> &'static str {
        match self {
            BackendKind::Bitwarden => "bw",
            BackendKind::Rbw => "rbw",
            BackendKind::SecretService => "",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Bitwarden => write!(f, "bitwarden"),
            BackendKind::Rbw => write!(f, "rbw"),
            BackendKind::SecretService => write!(f, "secret-service"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bitwarden" | "bw" => Ok(BackendKind::Bitwarden),
            "rbw" => Ok(BackendKind::Rbw),
            "secret-service" | "secretservice" => Ok(BackendKind::SecretService),
            other => Err(format!(
                "unknown backend '{}': expected bitwarden, rbw or secret-service",
                other
            )),
        }
    }
}

/// Backend selection and subprocess limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend kind (default: bitwarden).
    pub kind: BackendKind,
    /// Override for the vault executable.
    pub program: Option<String>,
    /// Timeout in seconds for one vault command (default: 10).
    pub command_timeout: u64,
    /// Seconds between background syncs while unlocked (default: 600, 0 = off).
    pub sync_interval: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            program: None,
            command_timeout: 10,
            sync_interval: 600, // 10 minutes
        }
    }
}

impl BackendConfig {
    /// The executable to run for CLI backends.
    pub fn program(&self) -> &str {
        self.program
            .as_deref()
            .unwrap_or_else(|| self.kind.default_program())
    }
}

/// Unlock limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound in seconds for one unlock attempt (default: 120).
    pub unlock_timeout: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            unlock_timeout: 120,
        }
    }
}

/// Query matching settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Shorter queries are ignored (default: 3).
    pub min_query_length: usize,
    /// Maximum number of matches returned (default: 4).
    pub max_results: usize,
    /// Keyword a query must start with, e.g. `"pass "` (default: none).
    pub trigger: Option<String>,
    /// Also search usernames and secondary attributes (default: false).
    pub match_secondary: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_query_length: 3,
            max_results: 4,
            trigger: None,
            match_secondary: false,
        }
    }
}

/// Clipboard settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClipboardConfig {
    /// Seconds before a copied secret is cleared (default: 5, 0 = never).
    pub clear_after: u64,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self { clear_after: 5 }
    }
}

/// How the master password is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    /// Run a dialog command.
    #[default]
    Command,
    /// Read from the controlling terminal.
    Terminal,
}

/// Unlock prompt settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Prompt implementation (default: command).
    pub kind: PromptKind,
    /// Dialog command and arguments; `{message}` is replaced by the prompt text.
    pub command: Vec<String>,
    /// Prompt timeout in seconds (default: 60).
    pub timeout: u64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            kind: PromptKind::default(),
            command: vec![
                "kdialog".to_string(),
                "--password".to_string(),
                "{message}".to_string(),
            ],
            timeout: 60,
        }
    }
}

/// Launcher-facing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Prompt for unlock when a query hits a locked store (default: true).
    ///
    /// When false, a single "Unlock password manager" match is offered instead.
    pub unlock_on_query: bool,
    /// Icon name reported for matches and actions.
    pub icon: String,
    /// Seconds to wait for a previous instance to release the socket (default: 5).
    pub takeover_timeout: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            unlock_on_query: true,
            icon: "changes-allow-symbolic".to_string(),
            takeover_timeout: 5,
        }
    }
}

/// Seconds to an optional duration, where 0 means disabled.
fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    /// Returns the default configuration file path.
    ///
    /// Returns `~/.config/vault-runner/config.toml` using `dirs::config_dir()`,
    /// or `None` if the config directory cannot be determined.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vault-runner").join("config.toml"))
    }

    /// Load configuration from the default path.
    ///
    /// - Returns `Ok(Config::default())` if no config file exists.
    /// - Returns `Err` if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Timeout for one vault command.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.command_timeout.max(1))
    }

    /// Interval between background syncs, `None` when disabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        optional_secs(self.backend.sync_interval)
    }

    /// Upper bound for one unlock attempt.
    pub fn unlock_timeout(&self) -> Duration {
        Duration::from_secs(self.session.unlock_timeout.max(1))
    }

    /// Delay before a copied secret is cleared, `None` when disabled.
    pub fn clear_after(&self) -> Option<Duration> {
        optional_secs(self.clipboard.clear_after)
    }

    /// Prompt timeout.
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt.timeout.max(1))
    }

    /// How long to wait for a previous instance to go away.
    pub fn takeover_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.takeover_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_values() {
        let config = Config::default();

        assert_eq!(config.backend.kind, BackendKind::Bitwarden);
        assert_eq!(config.backend.program(), "bw");
        assert_eq!(config.backend.command_timeout, 10);
        assert_eq!(config.backend.sync_interval, 600);

        assert_eq!(config.session.unlock_timeout, 120);

        assert_eq!(config.matching.min_query_length, 3);
        assert_eq!(config.matching.max_results, 4);
        assert!(config.matching.trigger.is_none());
        assert!(!config.matching.match_secondary);

        assert_eq!(config.clipboard.clear_after, 5);

        assert_eq!(config.prompt.kind, PromptKind::Command);
        assert_eq!(config.prompt.command[0], "kdialog");
        assert_eq!(config.prompt.timeout, 60);

        assert!(config.runner.unlock_on_query);
        assert_eq!(config.runner.icon, "changes-allow-symbolic");
        assert_eq!(config.runner.takeover_timeout, 5);
    }

    #[test]
    fn load_valid_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[backend]
kind = "rbw"
program = "/usr/local/bin/rbw"
command_timeout = 20
sync_interval = 0

[session]
unlock_timeout = 45

[matching]
min_query_length = 2
max_results = 10
trigger = "pass "
match_secondary = true

[clipboard]
clear_after = 15

[prompt]
kind = "terminal"
timeout = 30

[runner]
unlock_on_query = false
icon = "dialog-password"
takeover_timeout = 2
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).expect("Should parse");

        assert_eq!(config.backend.kind, BackendKind::Rbw);
        assert_eq!(config.backend.program(), "/usr/local/bin/rbw");
        assert_eq!(config.command_timeout(), Duration::from_secs(20));
        assert_eq!(config.sync_interval(), None);

        assert_eq!(config.unlock_timeout(), Duration::from_secs(45));

        assert_eq!(config.matching.min_query_length, 2);
        assert_eq!(config.matching.max_results, 10);
        assert_eq!(config.matching.trigger.as_deref(), Some("pass "));
        assert!(config.matching.match_secondary);

        assert_eq!(config.clear_after(), Some(Duration::from_secs(15)));

        assert_eq!(config.prompt.kind, PromptKind::Terminal);
        assert_eq!(config.prompt_timeout(), Duration::from_secs(30));

        assert!(!config.runner.unlock_on_query);
        assert_eq!(config.runner.icon, "dialog-password");
        assert_eq!(config.takeover_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn load_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[backend]
kind = "secret-service"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).expect("Should parse");

        assert_eq!(config.backend.kind, BackendKind::SecretService);
        assert_eq!(config.backend.command_timeout, 10);
        assert_eq!(config.matching.min_query_length, 3);
        assert_eq!(config.clear_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn load_invalid_config_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not valid toml {{{{").unwrap();

        let result = Config::load_from(file.path());
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_backend_kind_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\nkind = \"lastpass\"").unwrap();

        let result = Config::load_from(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn load_missing_file_returns_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load_from(&dir.path().join("absent.toml"));
        assert!(matches!(result.unwrap_err(), ConfigError::Io(_)));
    }

    #[test]
    fn load_empty_config_returns_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = Config::load_from(file.path()).expect("Should parse empty file");

        assert_eq!(config.matching.max_results, 4);
        assert!(config.runner.unlock_on_query);
    }

    #[test]
    fn zero_durations_disable_features() {
        let mut config = Config::default();
        config.clipboard.clear_after = 0;
        config.backend.sync_interval = 0;

        assert_eq!(config.clear_after(), None);
        assert_eq!(config.sync_interval(), None);
    }

    #[test]
    fn zero_timeouts_are_clamped() {
        let mut config = Config::default();
        config.backend.command_timeout = 0;
        config.session.unlock_timeout = 0;

        assert_eq!(config.command_timeout(), Duration::from_secs(1));
        assert_eq!(config.unlock_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn backend_kind_from_str() {
        assert_eq!("bw".parse::<BackendKind>().unwrap(), BackendKind::Bitwarden);
        assert_eq!("RBW".parse::<BackendKind>().unwrap(), BackendKind::Rbw);
        assert_eq!(
            "secret-service".parse::<BackendKind>().unwrap(),
            BackendKind::SecretService
        );
        assert!("keepass".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::SecretService.to_string(), "secret-service");
    }

    #[test]
    fn default_path_returns_config_dir() {
        let path = Config::default_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("vault-runner/config.toml"));
    }
}
