//! Dialog command unlock prompt.
//!
//! Runs an external password dialog such as `kdialog --password` or
//! `zenity --password` and reads the password from its stdout. Exit status 0
//! means the user confirmed; anything else means the dialog was cancelled.

use std::process::Stdio;
use std::time::Duration;

use secrecy::SecretString;
use tokio::process::Command;
use tracing::{debug, warn};
use vault_runner_core::{BoxFuture, PromptError, PromptRequest, UnlockPrompt};
use zeroize::Zeroize;

/// Placeholder in the configured arguments replaced by the prompt text.
pub const MESSAGE_PLACEHOLDER: &str = "{message}";

/// Unlock prompt that runs a dialog program.
#[derive(Debug, Clone)]
pub struct CommandPrompt {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPrompt {
    /// Create a prompt from a command line (program followed by arguments).
    ///
    /// # Errors
    ///
    /// Returns `PromptError::Unavailable` if the command line is empty.
    pub fn new(command: &[String], timeout: Duration) -> Result<Self, PromptError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| PromptError::Unavailable("empty prompt command".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    /// Arguments with the placeholder substituted.
    fn args_for(&self, request: &PromptRequest) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(MESSAGE_PLACEHOLDER, &request.message))
            .collect()
    }
}

impl UnlockPrompt for CommandPrompt {
    fn prompt(&self, request: PromptRequest) -> BoxFuture<'_, Result<SecretString, PromptError>> {
        Box::pin(async move {
            let mut command = Command::new(&self.program);
            command
                .args(self.args_for(&request))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            debug!(program = %self.program, backend = %request.backend, "Showing unlock dialog");
            let output = match tokio::time::timeout(self.timeout, command.output()).await {
                Err(_) => return Err(PromptError::Timeout(self.timeout.as_secs())),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(PromptError::Unavailable(format!(
                        "{} not found",
                        self.program
                    )))
                }
                Ok(Err(e)) => {
                    return Err(PromptError::UiError(format!(
                        "Failed to run {}: {}",
                        self.program, e
                    )))
                }
                Ok(Ok(output)) => output,
            };

            let mut stdout = output.stdout;
            if !output.status.success() {
                stdout.zeroize();
                debug!(status = ?output.status.code(), "Unlock dialog cancelled");
                return Err(PromptError::Cancelled);
            }

            let mut text = match String::from_utf8(stdout) {
                Ok(text) => text,
                Err(e) => {
                    let mut bytes = e.into_bytes();
                    bytes.zeroize();
                    warn!(program = %self.program, "Dialog returned non UTF-8 output");
                    return Err(PromptError::UiError("password is not valid UTF-8".to_string()));
                }
            };
            let password = text.trim_end_matches(['\r', '\n']).to_string();
            text.zeroize();

            if password.is_empty() {
                return Err(PromptError::Cancelled);
            }
            Ok(SecretString::from(password))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn request() -> PromptRequest {
        PromptRequest::new("bitwarden", "Unlock your password manager")
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            CommandPrompt::new(&[], Duration::from_secs(1)),
            Err(PromptError::Unavailable(_))
        ));
    }

    #[test]
    fn placeholder_is_substituted() {
        let prompt = CommandPrompt::new(
            &[
                "kdialog".to_string(),
                "--password".to_string(),
                "{message}".to_string(),
            ],
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            prompt.args_for(&request()),
            vec!["--password", "Unlock your password manager"]
        );
    }

    #[tokio::test]
    async fn confirmed_dialog_returns_password() {
        let prompt = CommandPrompt::new(&sh("printf 'hunter2\\n'"), Duration::from_secs(5)).unwrap();
        let password = prompt.prompt(request()).await.unwrap();
        assert_eq!(password.expose_secret(), "hunter2");
    }

    #[tokio::test]
    async fn message_reaches_dialog() {
        let prompt = CommandPrompt::new(
            &[
                "sh".to_string(),
                "-c".to_string(),
                "printf '%s' \"$0\"".to_string(),
                "{message}".to_string(),
            ],
            Duration::from_secs(5),
        )
        .unwrap();
        let echoed = prompt.prompt(request()).await.unwrap();
        assert_eq!(echoed.expose_secret(), "Unlock your password manager");
    }

    #[tokio::test]
    async fn nonzero_exit_is_cancel() {
        let prompt = CommandPrompt::new(&sh("exit 1"), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            prompt.prompt(request()).await,
            Err(PromptError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn empty_password_is_cancel() {
        let prompt = CommandPrompt::new(&sh("echo"), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            prompt.prompt(request()).await,
            Err(PromptError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn slow_dialog_times_out() {
        let prompt = CommandPrompt::new(&sh("sleep 5"), Duration::from_millis(100)).unwrap();
        assert!(matches!(
            prompt.prompt(request()).await,
            Err(PromptError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let prompt = CommandPrompt::new(
            &["/nonexistent/vault-runner-dialog".to_string()],
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(matches!(
            prompt.prompt(request()).await,
            Err(PromptError::Unavailable(_))
        ));
    }
}
