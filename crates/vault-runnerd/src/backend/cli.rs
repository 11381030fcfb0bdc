//! Vault backends driven by a command line tool.
//!
//! [`CliVault`] runs `bw` or `rbw` as a subprocess for every operation. Each
//! call is bounded by a timeout and the child is killed when the timeout
//! expires or the caller goes away.

use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info, warn};
use vault_runner_core::{
    BackendError, BoxFuture, Entry, Field, PromptRequest, UnlockFailure, UnlockPrompt,
    VaultBackend,
};
use zeroize::{Zeroize, Zeroizing};

use super::{bitwarden, rbw};

/// Exit code of a shell that could not find the program.
const COMMAND_NOT_FOUND: i32 = 127;

/// Which vault tool a [`CliVault`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliFlavor {
    /// The official Bitwarden CLI.
    Bitwarden,
    /// `rbw`, which keeps its own agent and pinentry.
    Rbw,
}

/// Why a tool invocation produced no output.
#[derive(Debug)]
enum ToolError {
    Missing(String),
    TimedOut(Duration),
    Failed(String),
}

impl ToolError {
    fn into_backend(self) -> BackendError {
        match self {
            ToolError::Missing(program) => {
                BackendError::Unavailable(format!("{} is not installed", program))
            }
            ToolError::TimedOut(after) => {
                BackendError::Unavailable(format!("command timed out after {:?}", after))
            }
            ToolError::Failed(message) => BackendError::Unavailable(message),
        }
    }

    fn into_unlock(self) -> UnlockFailure {
        match self {
            ToolError::TimedOut(after) => UnlockFailure::Timeout(after.as_secs()),
            other => UnlockFailure::Backend(other.into_backend().to_string()),
        }
    }
}

/// Captured result of one tool run. Stdout is wiped on drop.
struct ToolOutput {
    code: Option<i32>,
    stdout: Zeroizing<String>,
    stderr: String,
}

impl ToolOutput {
    fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The most useful error text: stderr, or stdout when stderr is empty.
    fn message(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// A vault executable plus its per-call timeout.
#[derive(Debug, Clone)]
struct CliTool {
    program: String,
    timeout: Duration,
}

impl CliTool {
    async fn run(&self, args: &[&str], env: &[(&str, &str)]) -> Result<ToolOutput, ToolError> {
        self.run_with_timeout(args, env, self.timeout).await
    }

    async fn run_with_timeout(
        &self,
        args: &[&str],
        env: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            command.env(key, value);
        }

        debug!(program = %self.program, command = args.first().copied().unwrap_or(""), "Running vault tool");
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Err(_) => {
                warn!(program = %self.program, ?timeout, "Vault tool timed out");
                return Err(ToolError::TimedOut(timeout));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::Missing(self.program.clone()))
            }
            Ok(Err(e)) => {
                return Err(ToolError::Failed(format!(
                    "failed to run {}: {}",
                    self.program, e
                )))
            }
            Ok(Ok(output)) => output,
        };

        if output.status.code() == Some(COMMAND_NOT_FOUND) {
            let mut stdout = output.stdout;
            stdout.zeroize();
            return Err(ToolError::Missing(self.program.clone()));
        }

        let stdout = match String::from_utf8(output.stdout) {
            Ok(text) => Zeroizing::new(text),
            Err(e) => {
                let mut bytes = e.into_bytes();
                let text = String::from_utf8_lossy(&bytes).into_owned();
                bytes.zeroize();
                Zeroizing::new(text)
            }
        };

        Ok(ToolOutput {
            code: output.status.code(),
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A vault reached through `bw` or `rbw`.
pub struct CliVault {
    flavor: CliFlavor,
    tool: CliTool,
    unlock_timeout: Duration,
    /// `bw` session key; always `None` for `rbw`.
    session_key: Mutex<Option<Zeroizing<String>>>,
}

impl CliVault {
    /// Create a backend running `program` as the given flavor.
    pub fn new(
        flavor: CliFlavor,
        program: impl Into<String>,
        command_timeout: Duration,
        unlock_timeout: Duration,
    ) -> Self {
        Self {
            flavor,
            tool: CliTool {
                program: program.into(),
                timeout: command_timeout,
            },
            unlock_timeout,
            session_key: Mutex::new(None),
        }
    }

    pub fn flavor(&self) -> CliFlavor {
        self.flavor
    }

    fn session_key(&self) -> Option<Zeroizing<String>> {
        self.session_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session_key(&self, key: Option<Zeroizing<String>>) {
        *self
            .session_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = key;
    }

    /// Forget the session key, unless it was replaced since `used` was read.
    fn forget_session_key(&self, used: &str) {
        let mut key = self
            .session_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if key.as_ref().is_some_and(|current| current.as_str() == used) {
            *key = None;
        }
    }

    /// Run a `bw` command with the session key in its environment.
    ///
    /// Returns the key the command ran with along with its output.
    async fn run_bw(
        &self,
        args: &[&str],
    ) -> Result<(ToolOutput, Zeroizing<String>), BackendError> {
        let key = self.session_key().ok_or(BackendError::Locked)?;
        let output = self
            .tool
            .run(args, &[(bitwarden::SESSION_ENV, key.as_str())])
            .await
            .map_err(ToolError::into_backend)?;
        Ok((output, key))
    }

    /// Forget the key a command ran with when the tool says the vault is locked.
    fn observe(&self, err: BackendError, used: &str) -> BackendError {
        if err == BackendError::Locked {
            self.forget_session_key(used);
        }
        err
    }

    async fn bw_is_locked(&self) -> Result<bool, BackendError> {
        if self.session_key().is_none() {
            return Ok(true);
        }
        let (output, key) = self.run_bw(bitwarden::STATUS_ARGS).await?;
        if !output.success() {
            return Err(self.observe(bitwarden::classify_message(output.message(), None), &key));
        }
        let locked = bitwarden::parse_status(&output.stdout)?;
        if locked {
            self.forget_session_key(&key);
        }
        Ok(locked)
    }

    async fn bw_list(&self) -> Result<Vec<Entry>, BackendError> {
        let (output, key) = self.run_bw(bitwarden::LIST_ARGS).await?;
        // `--response` reports failures as a JSON envelope on stdout
        let result = if output.stdout.trim().is_empty() {
            Err(bitwarden::classify_message(output.message(), None))
        } else {
            bitwarden::parse_item_list(&output.stdout)
        };
        result.map_err(|e| self.observe(e, &key))
    }

    async fn bw_fetch(&self, entry_id: &str, field: Field) -> Result<SecretString, BackendError> {
        let (output, key) = self.run_bw(&bitwarden::fetch_args(entry_id, field)).await?;
        if !output.success() {
            let message = output.message();
            if field == Field::Totp && message.to_lowercase().contains("totp") {
                return Err(BackendError::FieldNotFound {
                    entry: entry_id.to_string(),
                    field,
                });
            }
            return Err(self.observe(bitwarden::classify_message(message, Some(entry_id)), &key));
        }
        match field {
            Field::Totp => bitwarden::parse_totp(&output.stdout, entry_id),
            Field::Password | Field::Username => {
                bitwarden::parse_item_field(&output.stdout, entry_id, field)
            }
        }
    }

    async fn bw_unlock(&self, prompt: &dyn UnlockPrompt) -> Result<(), UnlockFailure> {
        let password = prompt
            .prompt(PromptRequest::new(self.name(), "Unlock your password manager"))
            .await?;

        let output = self
            .tool
            .run_with_timeout(
                bitwarden::UNLOCK_ARGS,
                &[(bitwarden::PASSWORD_ENV, password.expose_secret())],
                self.unlock_timeout,
            )
            .await
            .map_err(ToolError::into_unlock)?;

        if !output.success() {
            let message = output.message().to_string();
            if message.to_lowercase().contains("not logged in") {
                return Err(UnlockFailure::Backend(message));
            }
            return Err(UnlockFailure::Denied(if message.is_empty() {
                "invalid master password".to_string()
            } else {
                message
            }));
        }

        let key = output.stdout.trim();
        if key.is_empty() {
            return Err(UnlockFailure::Backend(
                "bw unlock printed no session key".to_string(),
            ));
        }
        self.set_session_key(Some(Zeroizing::new(key.to_string())));
        Ok(())
    }

    async fn rbw_is_locked(&self) -> Result<bool, BackendError> {
        let output = self
            .tool
            .run(rbw::UNLOCKED_ARGS, &[])
            .await
            .map_err(ToolError::into_backend)?;
        Ok(!output.success())
    }

    async fn rbw_list(&self) -> Result<Vec<Entry>, BackendError> {
        let output = self
            .tool
            .run(rbw::LIST_ARGS, &[])
            .await
            .map_err(ToolError::into_backend)?;
        if !output.success() {
            return Err(rbw::classify_stderr(output.message(), None, None));
        }
        Ok(rbw::parse_list(&output.stdout))
    }

    async fn rbw_fetch(&self, entry_id: &str, field: Field) -> Result<SecretString, BackendError> {
        let output = self
            .tool
            .run(&rbw::fetch_args(entry_id, field), &[])
            .await
            .map_err(ToolError::into_backend)?;
        if !output.success() {
            return Err(rbw::classify_stderr(
                output.message(),
                Some(entry_id),
                Some(field),
            ));
        }
        match field {
            Field::Totp => rbw::parse_code(&output.stdout, entry_id),
            Field::Password | Field::Username => {
                rbw::parse_raw_field(&output.stdout, entry_id, field)
            }
        }
    }

    async fn rbw_unlock(&self) -> Result<(), UnlockFailure> {
        let output = self
            .tool
            .run_with_timeout(rbw::UNLOCK_ARGS, &[], self.unlock_timeout)
            .await
            .map_err(ToolError::into_unlock)?;
        if output.success() {
            Ok(())
        } else {
            Err(UnlockFailure::Denied(output.message().to_string()))
        }
    }

    /// Run a maintenance command (sync, lock) and check its exit status.
    async fn run_simple(&self, bw_args: &[&str], rbw_args: &[&str]) -> Result<(), BackendError> {
        match self.flavor {
            CliFlavor::Bitwarden => {
                let (output, key) = self.run_bw(bw_args).await?;
                if output.success() {
                    return Ok(());
                }
                Err(self.observe(bitwarden::classify_message(output.message(), None), &key))
            }
            CliFlavor::Rbw => {
                let output = self
                    .tool
                    .run(rbw_args, &[])
                    .await
                    .map_err(ToolError::into_backend)?;
                if output.success() {
                    return Ok(());
                }
                Err(rbw::classify_stderr(output.message(), None, None))
            }
        }
    }
}

impl VaultBackend for CliVault {
    fn name(&self) -> &'static str {
        match self.flavor {
            CliFlavor::Bitwarden => "bitwarden",
            CliFlavor::Rbw => "rbw",
        }
    }

    fn list_entries(&self) -> BoxFuture<'_, Result<Vec<Entry>, BackendError>> {
        Box::pin(async move {
            let entries = match self.flavor {
                CliFlavor::Bitwarden => self.bw_list().await?,
                CliFlavor::Rbw => self.rbw_list().await?,
            };
            debug!(backend = self.name(), count = entries.len(), "Listed entries");
            Ok(entries)
        })
    }

    fn fetch_field<'a>(
        &'a self,
        entry_id: &'a str,
        field: Field,
    ) -> BoxFuture<'a, Result<SecretString, BackendError>> {
        Box::pin(async move {
            debug!(backend = self.name(), entry = %entry_id, %field, "Fetching field");
            match self.flavor {
                CliFlavor::Bitwarden => self.bw_fetch(entry_id, field).await,
                CliFlavor::Rbw => self.rbw_fetch(entry_id, field).await,
            }
        })
    }

    fn is_locked(&self) -> BoxFuture<'_, Result<bool, BackendError>> {
        Box::pin(async move {
            match self.flavor {
                CliFlavor::Bitwarden => self.bw_is_locked().await,
                CliFlavor::Rbw => self.rbw_is_locked().await,
            }
        })
    }

    fn unlock<'a>(
        &'a self,
        prompt: &'a dyn UnlockPrompt,
    ) -> BoxFuture<'a, Result<(), UnlockFailure>> {
        Box::pin(async move {
            let result = match self.flavor {
                CliFlavor::Bitwarden => self.bw_unlock(prompt).await,
                CliFlavor::Rbw => self.rbw_unlock().await,
            };
            match &result {
                Ok(()) => info!(backend = self.name(), "Vault unlocked"),
                Err(e) => warn!(backend = self.name(), error = %e, "Vault unlock failed"),
            }
            result
        })
    }

    fn sync(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            self.run_simple(bitwarden::SYNC_ARGS, rbw::SYNC_ARGS).await?;
            debug!(backend = self.name(), "Vault synced");
            Ok(())
        })
    }

    fn lock(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            let result = match self.flavor {
                CliFlavor::Bitwarden if self.session_key().is_none() => Ok(()),
                _ => self.run_simple(bitwarden::LOCK_ARGS, rbw::LOCK_ARGS).await,
            };
            self.set_session_key(None);
            result
        })
    }
}

impl std::fmt::Debug for CliVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliVault")
            .field("flavor", &self.flavor)
            .field("program", &self.tool.program)
            .field("timeout", &self.tool.timeout)
            .field("session_key", &self.session_key().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use vault_runner_core::mock::MockPrompt;

    /// Write an executable shell script standing in for a vault tool.
    fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const FAKE_BW: &str = r#"
case "$1" in
  status)
    if [ "$BW_SESSION" = "key123" ]; then echo '{"status":"unlocked"}'; else echo '{"status":"locked"}'; fi ;;
  unlock)
    if [ "$VAULT_RUNNER_BW_PASSWORD" = "hunter2" ]; then printf 'key123'; else echo 'Invalid master password.' >&2; exit 1; fi ;;
  list)
    if [ "$BW_SESSION" = "expired" ]; then sleep 0.3; fi
    if [ "$BW_SESSION" != "key123" ]; then echo '{"success":false,"message":"Vault is locked."}'; exit 1; fi
    echo '{"success":true,"data":{"object":"list","data":[{"id":"gh","name":"GitHub","login":{"username":"octocat","password":"gh-secret","totp":"otpauth://x"}}]}}' ;;
  get)
    if [ "$BW_SESSION" != "key123" ]; then echo 'Vault is locked.' >&2; exit 1; fi
    if [ "$3" != "gh" ]; then echo 'Not found.' >&2; exit 1; fi
    if [ "$2" = "totp" ]; then echo '123456'; else echo '{"id":"gh","login":{"username":"octocat","password":"gh-secret"}}'; fi ;;
  sync) echo 'Syncing complete.' ;;
  lock) echo 'Your vault is locked.' ;;
  *) exit 2 ;;
esac
"#;

    fn bw(dir: &Path) -> CliVault {
        CliVault::new(
            CliFlavor::Bitwarden,
            fake_tool(dir, "bw", FAKE_BW).to_string_lossy(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn bw_starts_locked() {
        let dir = tempfile::tempdir().unwrap();
        let vault = bw(dir.path());

        assert!(vault.is_locked().await.unwrap());
        assert_eq!(vault.list_entries().await, Err(BackendError::Locked));
    }

    #[tokio::test]
    async fn bw_unlock_then_list_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let vault = bw(dir.path());
        let prompt = MockPrompt::with_password("hunter2");

        vault.unlock(&prompt).await.unwrap();
        assert_eq!(prompt.call_count(), 1);
        assert!(!vault.is_locked().await.unwrap());

        let entries = vault.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "GitHub");
        assert!(entries[0].has_field(Field::Totp));

        let password = vault.fetch_field("gh", Field::Password).await.unwrap();
        assert_eq!(password.expose_secret(), "gh-secret");
        let code = vault.fetch_field("gh", Field::Totp).await.unwrap();
        assert_eq!(code.expose_secret(), "123456");
    }

    #[tokio::test]
    async fn bw_wrong_password_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let vault = bw(dir.path());

        let result = vault.unlock(&MockPrompt::with_password("wrong")).await;
        assert!(matches!(result, Err(UnlockFailure::Denied(_))));
        assert!(vault.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn bw_cancelled_prompt_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let vault = bw(dir.path());

        let result = vault.unlock(&MockPrompt::cancelled()).await;
        assert!(matches!(result, Err(UnlockFailure::Denied(_))));
    }

    #[tokio::test]
    async fn bw_unknown_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vault = bw(dir.path());
        vault.unlock(&MockPrompt::with_password("hunter2")).await.unwrap();

        assert_eq!(
            vault.fetch_field("stale", Field::Password).await.unwrap_err(),
            BackendError::EntryNotFound("stale".into())
        );
    }

    #[tokio::test]
    async fn bw_lock_forgets_session_key() {
        let dir = tempfile::tempdir().unwrap();
        let vault = bw(dir.path());
        vault.unlock(&MockPrompt::with_password("hunter2")).await.unwrap();
        vault.sync().await.unwrap();

        vault.lock().await.unwrap();
        assert!(vault.is_locked().await.unwrap());
        assert_eq!(vault.list_entries().await, Err(BackendError::Locked));
    }

    #[tokio::test]
    async fn bw_late_locked_answer_keeps_new_session_key() {
        let dir = tempfile::tempdir().unwrap();
        let vault = bw(dir.path());
        vault.set_session_key(Some(Zeroizing::new("expired".to_string())));
        let prompt = MockPrompt::with_password("hunter2");

        let late = vault.list_entries();
        let reunlock = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            vault.unlock(&prompt).await.unwrap();
        };
        let (late, ()) = tokio::join!(late, reunlock);

        assert_eq!(late, Err(BackendError::Locked));
        assert!(!vault.is_locked().await.unwrap());
        assert_eq!(vault.list_entries().await.unwrap().len(), 1);
        assert_eq!(prompt.call_count(), 1);
    }

    #[tokio::test]
    async fn bw_debug_redacts_session_key() {
        let dir = tempfile::tempdir().unwrap();
        let vault = bw(dir.path());
        vault.unlock(&MockPrompt::with_password("hunter2")).await.unwrap();

        let debug = format!("{:?}", vault);
        assert!(!debug.contains("key123"));
        assert!(debug.contains("REDACTED"));
    }

    fn rbw(dir: &Path) -> CliVault {
        let marker = dir.join("unlocked");
        let body = format!(
            r#"
MARKER='{marker}'
case "$1" in
  unlocked) test -f "$MARKER" ;;
  unlock) touch "$MARKER" ;;
  lock) rm -f "$MARKER" ;;
  sync) exit 0 ;;
  list)
    if [ ! -f "$MARKER" ]; then echo 'rbw list: agent is locked' >&2; exit 1; fi
    printf 'id-1\tPaypal\tme@example.com\tShopping\nid-2\tRouter\t\t\n' ;;
  get)
    if [ "$3" != "id-1" ]; then echo 'rbw get: no entry found' >&2; exit 1; fi
    echo '{{"id":"id-1","name":"Paypal","data":{{"username":"me@example.com","password":"pp-secret"}}}}' ;;
  code)
    echo 'rbw code: not a totp entry' >&2; exit 1 ;;
  *) exit 2 ;;
esac
"#,
            marker = marker.display()
        );
        CliVault::new(
            CliFlavor::Rbw,
            fake_tool(dir, "rbw", &body).to_string_lossy(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn rbw_lock_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let vault = rbw(dir.path());
        let prompt = MockPrompt::with_password("unused");

        assert!(vault.is_locked().await.unwrap());
        assert_eq!(vault.list_entries().await, Err(BackendError::Locked));

        vault.unlock(&prompt).await.unwrap();
        // rbw draws its own pinentry
        assert_eq!(prompt.call_count(), 0);
        assert!(!vault.is_locked().await.unwrap());

        let entries = vault.list_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attributes, vec!["Shopping".to_string()]);

        vault.lock().await.unwrap();
        assert!(vault.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn rbw_fetch_errors_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let vault = rbw(dir.path());
        vault.unlock(&MockPrompt::default()).await.unwrap();

        let username = vault.fetch_field("id-1", Field::Username).await.unwrap();
        assert_eq!(username.expose_secret(), "me@example.com");

        assert_eq!(
            vault.fetch_field("id-9", Field::Password).await.unwrap_err(),
            BackendError::EntryNotFound("id-9".into())
        );
        assert!(matches!(
            vault.fetch_field("id-1", Field::Totp).await,
            Err(BackendError::FieldNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let vault = CliVault::new(
            CliFlavor::Rbw,
            "/nonexistent/vault-runner-rbw",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(
            vault.is_locked().await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(matches!(
            vault.unlock(&MockPrompt::default()).await,
            Err(UnlockFailure::Backend(_))
        ));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_tool(dir.path(), "rbw", "sleep 5");
        let vault = CliVault::new(
            CliFlavor::Rbw,
            program.to_string_lossy(),
            Duration::from_millis(100),
            Duration::from_millis(100),
        );

        assert!(matches!(
            vault.list_entries().await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(matches!(
            vault.unlock(&MockPrompt::default()).await,
            Err(UnlockFailure::Timeout(_))
        ));
    }
}
