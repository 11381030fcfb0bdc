//! Unlock prompt implementations.
//!
//! This module provides implementations of the [`UnlockPrompt`] trait:
//!
//! - [`CommandPrompt`]: runs a password dialog program (default)
//! - [`TerminalPrompt`]: reads from the terminal
//!
//! A mock lives in `vault_runner_core::mock`.

mod command;
mod terminal;

use std::sync::Arc;

pub use command::{CommandPrompt, MESSAGE_PLACEHOLDER};
pub use terminal::TerminalPrompt;

use vault_runner_core::config::{Config, PromptKind};
use vault_runner_core::{PromptError, UnlockPrompt};

/// Build the prompt selected in the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn UnlockPrompt>, PromptError> {
    let timeout = config.prompt_timeout();
    Ok(match config.prompt.kind {
        PromptKind::Command => Arc::new(CommandPrompt::new(&config.prompt.command, timeout)?),
        PromptKind::Terminal => Arc::new(TerminalPrompt::new(timeout)),
    })
}
