//! vault-runner-ctl - Command line client for the vault-runner daemon.
//!
//! Sends the same requests a launcher plugin sends, which makes it handy for
//! scripting and for checking a setup without a launcher.
//!
//! # Usage
//!
//! ```bash
//! # Search entries
//! vault-runner-ctl query github
//!
//! # Copy the password (default action) or another field of a match
//! vault-runner-ctl run 0f1a2b3c
//! vault-runner-ctl run 0f1a2b3c --action copy-totp
//!
//! # Session management
//! vault-runner-ctl status
//! vault-runner-ctl lock
//! vault-runner-ctl sync
//!
//! # Check or stop the daemon
//! vault-runner-ctl ping
//! vault-runner-ctl stop
//! ```

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vault_runner_core::{default_socket_path, MatchDescriptor, Request, Response};

/// Control the vault-runner daemon.
#[derive(Parser)]
#[command(name = "vault-runner-ctl")]
#[command(about = "Query and control the vault-runner daemon")]
#[command(version)]
struct Cli {
    /// Path to the daemon socket [default: $XDG_RUNTIME_DIR/vault-runner/socket]
    #[arg(short, long, value_name = "PATH", global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search entries
    #[command(alias = "q")]
    Query {
        /// Query text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Run an action on a match
    Run {
        /// Match id as printed by `query`
        match_id: String,

        /// Action id (copy-password, copy-username, copy-totp)
        #[arg(long, short = 'a', value_name = "ID", default_value = "")]
        action: String,
    },

    /// List the actions offered on matches
    Actions,

    /// Show the session state
    Status,

    /// Lock the vault
    Lock,

    /// Sync the vault with its server
    Sync,

    /// Check if daemon is running
    Ping,

    /// Ask the daemon to exit
    Stop,
}

/// Send a request to the daemon and receive a response.
fn send_request(socket_path: &Path, request: &Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket_path)
        .with_context(|| format!("Failed to connect to daemon at {:?}", socket_path))?;

    let request_json = request
        .to_json_line()
        .context("Failed to serialize request")?;
    stream
        .write_all(request_json.as_bytes())
        .context("Failed to send request")?;
    stream.flush().context("Failed to flush request")?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .context("Failed to read response")?;
    if response_line.is_empty() {
        anyhow::bail!("Daemon closed the connection without answering");
    }

    Response::parse(response_line.trim()).context("Failed to parse response")
}

/// One line per match: id, title and username.
fn format_match(m: &MatchDescriptor) -> String {
    if m.subtitle.is_empty() {
        format!("{:<38} {}", m.id, m.title)
    } else {
        format!("{:<38} {} ({})", m.id, m.title, m.subtitle)
    }
}

/// Print the answer to a request, returning the exit code.
fn report(response: Response) -> ExitCode {
    match response {
        Response::Matches { matches, failure } => {
            if let Some(failure) = failure {
                eprintln!("Error ({}): {}", failure.code, failure.message);
                return ExitCode::FAILURE;
            }
            if matches.is_empty() {
                println!("No matches.");
            }
            for m in &matches {
                println!("{}", format_match(m));
            }
            ExitCode::SUCCESS
        }
        Response::Actions { actions } => {
            for action in actions {
                println!("{:<15} {}", action.id, action.label);
            }
            ExitCode::SUCCESS
        }
        Response::Done => {
            println!("Copied to clipboard.");
            ExitCode::SUCCESS
        }
        Response::Status { state, backend } => {
            println!("Backend: {}", backend);
            println!("State:   {}", state);
            ExitCode::SUCCESS
        }
        Response::Locked => {
            println!("Vault locked.");
            ExitCode::SUCCESS
        }
        Response::Synced => {
            println!("Vault synced.");
            ExitCode::SUCCESS
        }
        Response::Pong { pid } => {
            println!("Daemon is running (pid {}).", pid);
            ExitCode::SUCCESS
        }
        Response::ShuttingDown => {
            println!("Daemon is shutting down.");
            ExitCode::SUCCESS
        }
        Response::Error { code, message } => {
            eprintln!("Error ({}): {}", code, message);
            ExitCode::FAILURE
        }
    }
}

fn request_for(command: Commands) -> Request {
    match command {
        Commands::Query { text } => Request::Match {
            query: text.join(" "),
        },
        Commands::Run { match_id, action } => Request::Run {
            match_id,
            action_id: action,
        },
        Commands::Actions => Request::Actions,
        Commands::Status => Request::Status,
        Commands::Lock => Request::Lock,
        Commands::Sync => Request::Sync,
        Commands::Ping => Request::Ping,
        Commands::Stop => Request::Shutdown,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let socket_path = cli.socket.unwrap_or_else(default_socket_path);

    match send_request(&socket_path, &request_for(cli.command)) {
        Ok(response) => report(response),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn query_words_are_joined() {
        let cli = Cli::parse_from(["vault-runner-ctl", "query", "pass", "github"]);
        assert_eq!(
            request_for(cli.command),
            Request::Match {
                query: "pass github".into()
            }
        );
    }

    #[test]
    fn run_defaults_to_empty_action() {
        let cli = Cli::parse_from(["vault-runner-ctl", "run", "abc"]);
        assert_eq!(
            request_for(cli.command),
            Request::Run {
                match_id: "abc".into(),
                action_id: String::new()
            }
        );

        let cli = Cli::parse_from(["vault-runner-ctl", "run", "abc", "--action", "copy-totp"]);
        assert_eq!(
            request_for(cli.command),
            Request::Run {
                match_id: "abc".into(),
                action_id: "copy-totp".into()
            }
        );
    }

    #[test]
    fn socket_flag_is_global() {
        let cli = Cli::parse_from(["vault-runner-ctl", "stop", "--socket", "/tmp/x.sock"]);
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/x.sock")));
        assert_eq!(request_for(cli.command), Request::Shutdown);
    }

    #[test]
    fn match_formatting() {
        let mut m = MatchDescriptor::unlock_item("icon");
        assert!(format_match(&m).ends_with("Unlock password manager"));

        m.subtitle = "octocat".into();
        assert!(format_match(&m).ends_with("(octocat)"));
    }

    #[test]
    fn send_request_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut line = String::new();
            BufReader::new(&stream).read_line(&mut line).unwrap();
            assert_eq!(Request::parse(line.trim()).unwrap(), Request::Ping);
            let json = Response::Pong { pid: 7 }.to_json_line().unwrap();
            (&stream).write_all(json.as_bytes()).unwrap();
        });

        let response = send_request(&path, &Request::Ping).unwrap();
        assert_eq!(response, Response::Pong { pid: 7 });
        server.join().unwrap();
    }

    #[test]
    fn missing_daemon_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(send_request(&dir.path().join("absent.sock"), &Request::Ping).is_err());
    }
}
