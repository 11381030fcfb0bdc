//! Terminal unlock prompt for headless use.
//!
//! Reads the master password from the controlling terminal with
//! `rpassword` (no echo). Only useful when the daemon runs in a terminal.

use std::time::Duration;

use secrecy::SecretString;
use tracing::debug;
use vault_runner_core::{BoxFuture, PromptError, PromptRequest, UnlockPrompt};

/// Terminal-based unlock prompt.
pub struct TerminalPrompt {
    timeout: Duration,
}

impl TerminalPrompt {
    /// Create a terminal prompt that gives up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl UnlockPrompt for TerminalPrompt {
    fn prompt(&self, request: PromptRequest) -> BoxFuture<'_, Result<SecretString, PromptError>> {
        Box::pin(async move {
            // rpassword blocks on the tty
            let read = tokio::task::spawn_blocking(move || {
                let password = rpassword::prompt_password(format!("{}: ", request.message))
                    .map_err(|e| PromptError::UiError(format!("Failed to read password: {}", e)))?;

                if password.is_empty() {
                    return Err(PromptError::Cancelled);
                }

                debug!(backend = %request.backend, "Password entered on terminal");
                Ok(SecretString::from(password))
            });

            match tokio::time::timeout(self.timeout, read).await {
                Ok(joined) => {
                    joined.map_err(|e| PromptError::UiError(format!("Task failed: {}", e)))?
                }
                Err(_) => Err(PromptError::Timeout(self.timeout.as_secs())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_create_terminal_prompt() {
        let prompt = TerminalPrompt::new(Duration::from_secs(30));
        assert_eq!(prompt.timeout, Duration::from_secs(30));
    }
}
