//! System clipboard access through `arboard`.
//!
//! On X11 and Wayland the clipboard content is served by the process that
//! set it, so the `arboard::Clipboard` handle has to stay alive after a copy.
//! [`SystemClipboard`] keeps it on a dedicated thread and talks to that thread
//! over a channel. The handle is created lazily and recreated after a
//! failure, so a daemon started before the display server still works once
//! the display is up.

use std::sync::mpsc;
use std::thread;

use tracing::{debug, warn};
use vault_runner_core::{ClipboardError, ClipboardProvider};
use zeroize::Zeroizing;

enum Command {
    Set(Zeroizing<String>, mpsc::Sender<Result<(), ClipboardError>>),
    Get(mpsc::Sender<Result<Option<String>, ClipboardError>>),
    Clear(mpsc::Sender<Result<(), ClipboardError>>),
}

/// The desktop clipboard.
pub struct SystemClipboard {
    commands: mpsc::Sender<Command>,
}

impl SystemClipboard {
    /// Start the clipboard thread.
    pub fn spawn() -> Result<Self, ClipboardError> {
        let (commands, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("clipboard".to_string())
            .spawn(move || serve(receiver))
            .map_err(|e| ClipboardError::Unavailable(format!("failed to start thread: {}", e)))?;
        Ok(Self { commands })
    }

    fn request<T>(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<T, ClipboardError>>) -> Command,
    ) -> Result<T, ClipboardError> {
        let (reply, response) = mpsc::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ClipboardError::Unavailable("clipboard thread stopped".to_string()))?;
        response
            .recv()
            .map_err(|_| ClipboardError::Unavailable("clipboard thread stopped".to_string()))?
    }
}

impl ClipboardProvider for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        let text = Zeroizing::new(text.to_string());
        self.request(|reply| Command::Set(text, reply))
    }

    fn get_text(&self) -> Result<Option<String>, ClipboardError> {
        self.request(Command::Get)
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        self.request(Command::Clear)
    }
}

fn unavailable(err: arboard::Error) -> ClipboardError {
    ClipboardError::Unavailable(err.to_string())
}

/// Clipboard thread loop; exits when the last sender is dropped.
fn serve(receiver: mpsc::Receiver<Command>) {
    let mut handle: Option<arboard::Clipboard> = None;

    for command in receiver {
        let clipboard = match handle.as_mut() {
            Some(clipboard) => Ok(clipboard),
            None => match arboard::Clipboard::new() {
                Ok(clipboard) => {
                    debug!("Connected to clipboard");
                    Ok(handle.insert(clipboard))
                }
                Err(e) => {
                    warn!(error = %e, "Clipboard not available");
                    Err(unavailable(e))
                }
            },
        };

        let failed = match command {
            Command::Set(text, reply) => {
                let result = clipboard.and_then(|c| c.set_text(text.as_str()).map_err(unavailable));
                let failed = result.is_err();
                let _ = reply.send(result);
                failed
            }
            Command::Get(reply) => {
                let result = clipboard.and_then(|c| match c.get_text() {
                    Ok(text) => Ok(Some(text)),
                    Err(arboard::Error::ContentNotAvailable) => Ok(None),
                    Err(e) => Err(unavailable(e)),
                });
                let failed = result.is_err();
                let _ = reply.send(result);
                failed
            }
            Command::Clear(reply) => {
                let result = clipboard.and_then(|c| c.clear().map_err(unavailable));
                let failed = result.is_err();
                let _ = reply.send(result);
                failed
            }
        };

        if failed {
            // reconnect on next use
            handle = None;
        }
    }
    debug!("Clipboard thread exiting");
}
