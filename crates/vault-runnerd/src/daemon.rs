//! Main daemon orchestration.
//!
//! This module provides the `Daemon` struct that coordinates:
//! - Socket listening for launcher and control client connections
//! - Request/response handling through the [`Runner`]
//! - Periodic backend sync
//! - Shutdown on request or signal, releasing the socket
//!
//! Every connection is served on its own task, so a query waiting for the
//! user to type the master password does not hold up other requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vault_runner_core::{ErrorCode, Request, Response, SocketProvider};

use crate::runner::Runner;

/// The main daemon struct.
pub struct Daemon<S: SocketProvider> {
    runner: Arc<Runner>,
    socket_provider: S,
    sync_interval: Option<Duration>,
    shutdown: Arc<Notify>,
}

impl<S: SocketProvider> Daemon<S> {
    /// Create a daemon. `sync_interval = None` disables periodic sync.
    pub fn new(runner: Arc<Runner>, socket_provider: S, sync_interval: Option<Duration>) -> Self {
        Self {
            runner,
            socket_provider,
            sync_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run the daemon until a shutdown request, SIGTERM or SIGINT.
    ///
    /// The socket file is removed before the listener is closed, so a
    /// successor waiting for the socket to go quiet can bind right away.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.socket_provider.listen().await?;
        info!(
            path = ?self.socket_provider.socket_path(),
            backend = self.runner.session().backend().name(),
            "Daemon listening for connections"
        );

        let sync_task = self
            .sync_interval
            .map(|every| spawn_periodic_sync(Arc::clone(&self.runner), every));
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("Accepted connection");
                        let runner = Arc::clone(&self.runner);
                        let shutdown = Arc::clone(&self.shutdown);
                        tokio::spawn(handle_connection(stream, runner, shutdown));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
                _ = self.shutdown.notified() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT");
                    break;
                }
            }
        }

        if let Some(task) = sync_task {
            task.abort();
        }
        self.socket_provider.release();
        drop(listener);
        info!("Daemon stopped");
        Ok(())
    }

    /// Handle a parsed request (for testing).
    #[cfg(test)]
    async fn handle_request(&self, request: Request) -> Response {
        handle_request(&self.runner, request).await
    }
}

fn spawn_periodic_sync(runner: Arc<Runner>, every: Duration) -> JoinHandle<()> {
    debug!(interval_secs = every.as_secs(), "Starting periodic sync");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = runner.sync().await {
                warn!(error = %e, "Periodic sync failed");
            }
        }
    })
}

/// Handle a single client connection.
async fn handle_connection(stream: UnixStream, runner: Arc<Runner>, shutdown: Arc<Notify>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Read request
    match reader.read_line(&mut line).await {
        Ok(0) => {
            debug!("Client disconnected without sending request");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "Failed to read request");
            return;
        }
    }

    // Parse request
    let request = match Request::parse(line.trim()) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "Failed to parse request");
            let response = Response::error(ErrorCode::InvalidRequest, e.to_string());
            let _ = send_response(&mut writer, &response).await;
            return;
        }
    };

    let response = handle_request(&runner, request).await;

    if let Err(e) = send_response(&mut writer, &response).await {
        // launchers drop stale queries without reading the answer
        debug!(error = %e, "Failed to send response");
    }

    if response == Response::ShuttingDown {
        shutdown.notify_one();
    }
}

/// Handle a parsed request.
async fn handle_request(runner: &Runner, request: Request) -> Response {
    match request {
        Request::Match { query } => {
            let outcome = runner.query(&query).await;
            Response::matches(outcome.matches, outcome.failure)
        }
        Request::Run {
            match_id,
            action_id,
        } => match runner.run(&match_id, &action_id).await {
            Ok(()) => Response::Done,
            Err(e) => {
                warn!(entry = %match_id, action = %action_id, error = %e, "Run failed");
                Response::error(e.code(), e.to_string())
            }
        },
        Request::Actions => Response::Actions {
            actions: runner.actions(),
        },
        Request::Status => {
            let (state, backend) = runner.status().await;
            Response::Status {
                state: state.to_string(),
                backend: backend.to_string(),
            }
        }
        Request::Lock => match runner.lock().await {
            Ok(()) => Response::Locked,
            Err(e) => Response::error(ErrorCode::from(&e), e.to_string()),
        },
        Request::Sync => match runner.sync().await {
            Ok(()) => Response::Synced,
            Err(e) => Response::error(ErrorCode::from(&e), e.to_string()),
        },
        Request::Ping => Response::Pong {
            pid: std::process::id(),
        },
        Request::Shutdown => Response::ShuttingDown,
    }
}

/// Send a response to the client.
async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Response,
) -> anyhow::Result<()> {
    let json = response.to_json_line()?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
