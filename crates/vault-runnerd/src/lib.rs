//! vault-runner daemon implementation.
//!
//! This crate provides the long-lived daemon that answers launcher queries:
//! the concrete vault backends, the unlock prompts, system clipboard access,
//! socket handling and the request loop.

pub mod backend;
pub mod clipboard;
pub mod daemon;
pub mod instance;
pub mod prompt;
pub mod runner;
pub mod socket;

// Re-export main components
pub use backend::{CliFlavor, CliVault, SecretServiceVault};
pub use clipboard::SystemClipboard;
pub use daemon::Daemon;
pub use instance::{exchange, take_over, InstanceError, Takeover};
pub use prompt::{CommandPrompt, TerminalPrompt};
pub use runner::{QueryOutcome, RunError, Runner, RunnerSettings};
pub use socket::ManualSocketProvider;
