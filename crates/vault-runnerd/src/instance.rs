//! Single-instance handshake.
//!
//! Before binding, a starting daemon asks whoever holds the socket to exit:
//! it sends `ping`, and if a daemon answers, `shutdown`, then waits until
//! the socket stops accepting connections. The old daemon removes its socket
//! file before closing the listener, so once connecting fails the path is
//! free to bind. A holder that accepts connections but does not answer is
//! left alone and startup fails.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vault_runner_core::{ProtocolError, Request, Response};

/// Interval between checks whether the previous instance is gone.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from the startup handshake.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The previous instance kept its socket open.
    #[error("previous instance (pid {pid}) still running after {waited:?}")]
    StillRunning { pid: u32, waited: Duration },

    /// Something holds the socket but did not answer `ping` properly.
    #[error("socket {} is held by an unresponsive process: {reason}", .path.display())]
    Unresponsive { path: PathBuf, reason: String },
}

/// What the handshake found on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Takeover {
    /// Nobody listens; the path is free or holds a stale socket.
    Vacant,
    /// A running daemon was asked to exit and did.
    Replaced { pid: u32 },
}

/// Send one request and read one response.
pub async fn exchange(path: &Path, request: &Request) -> Result<Response, ProtocolError> {
    let stream = UnixStream::connect(path).await?;
    let (reader, mut writer) = stream.into_split();

    let json = request.to_json_line()?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    Response::parse(line.trim())
}

/// Make the socket at `path` ours to bind, stopping a running daemon.
///
/// Waits at most `wait` for each step of the handshake. Only a missing
/// socket or one that refuses connections counts as vacant.
pub async fn take_over(path: &Path, wait: Duration) -> Result<Takeover, InstanceError> {
    let unresponsive = |reason: String| InstanceError::Unresponsive {
        path: path.to_path_buf(),
        reason,
    };

    let pid = match tokio::time::timeout(wait, exchange(path, &Request::Ping)).await {
        Ok(Ok(Response::Pong { pid })) => pid,
        Ok(Ok(other)) => {
            warn!(path = %path.display(), response = ?other, "Unexpected answer to ping");
            return Err(unresponsive(format!("unexpected answer {:?}", other)));
        }
        Ok(Err(ProtocolError::Io(e)))
            if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) =>
        {
            debug!(path = %path.display(), error = %e, "No running instance");
            return Ok(Takeover::Vacant);
        }
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "Ping failed");
            return Err(unresponsive(e.to_string()));
        }
        Err(_) => {
            warn!(path = %path.display(), "Socket holder did not answer ping");
            return Err(unresponsive(format!("no answer to ping within {:?}", wait)));
        }
    };

    info!(pid, "Asking running instance to exit");
    match tokio::time::timeout(wait, exchange(path, &Request::Shutdown)).await {
        Ok(Ok(Response::ShuttingDown)) => {}
        Ok(Ok(other)) => warn!(response = ?other, "Unexpected answer to shutdown"),
        Ok(Err(e)) => debug!(error = %e, "Shutdown request not answered"),
        Err(_) => debug!("Shutdown request timed out"),
    }

    let deadline = Instant::now() + wait;
    loop {
        if UnixStream::connect(path).await.is_err() {
            info!(pid, "Previous instance exited");
            return Ok(Takeover::Replaced { pid });
        }
        if Instant::now() >= deadline {
            return Err(InstanceError::StillRunning { pid, waited: wait });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
