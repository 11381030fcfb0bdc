//! Vault backend implementations.
//!
//! - [`CliVault`]: drives `bw` or `rbw` as a subprocess
//! - [`SecretServiceVault`]: talks to `org.freedesktop.secrets`
//!
//! An in-memory backend for tests lives in `vault_runner_core::mock`.

pub mod bitwarden;
mod cli;
pub mod rbw;
mod secret_service;

use std::sync::Arc;

pub use cli::{CliFlavor, CliVault};
pub use secret_service::{entries_from_records, ItemRecord, SecretServiceVault};

use vault_runner_core::config::{BackendKind, Config};
use vault_runner_core::VaultBackend;

/// Build the backend selected in the configuration.
pub fn from_config(config: &Config) -> Arc<dyn VaultBackend> {
    let command_timeout = config.command_timeout();
    let unlock_timeout = config.unlock_timeout();
    let program = config.backend.program().to_string();

    match config.backend.kind {
        BackendKind::Bitwarden => Arc::new(CliVault::new(
            CliFlavor::Bitwarden,
            program,
            command_timeout,
            unlock_timeout,
        )),
        BackendKind::Rbw => Arc::new(CliVault::new(
            CliFlavor::Rbw,
            program,
            command_timeout,
            unlock_timeout,
        )),
        BackendKind::SecretService => {
            Arc::new(SecretServiceVault::new(command_timeout, unlock_timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_follows_configured_kind() {
        let mut config = Config::default();
        assert_eq!(from_config(&config).name(), "bitwarden");

        config.backend.kind = BackendKind::Rbw;
        assert_eq!(from_config(&config).name(), "rbw");

        config.backend.kind = BackendKind::SecretService;
        assert_eq!(from_config(&config).name(), "secret-service");
    }
}
