//! Secret Service (`org.freedesktop.secrets`) backend.
//!
//! Works with any store that implements the freedesktop Secret Service API,
//! such as KeePassXC, GNOME Keyring or KWallet. The `secret-service` client
//! is used through its blocking API on tokio's blocking pool; each operation
//! opens its own connection.
//!
//! Entry identifiers are D-Bus object paths of the items.

use std::collections::HashMap;
use std::time::Duration;

use secret_service::blocking::SecretService;
use secret_service::EncryptionType;
use secrecy::SecretString;
use tracing::{debug, info, warn};
use vault_runner_core::{
    dedup_entries, BackendError, BoxFuture, Entry, Field, UnlockFailure, UnlockPrompt,
    VaultBackend,
};
use zeroize::Zeroize;

/// Attributes that are bookkeeping rather than searchable metadata.
const EXCLUDED_ATTRIBUTES: &[&str] = &["Path", "Notes", "Title", "Uuid", "xdg:schema"];

/// Attributes holding the username, in lookup order.
const USERNAME_ATTRIBUTES: &[&str] = &["username", "UserName", "user"];

/// What a listing needs to know about one item.
#[derive(Debug, Clone, Default)]
pub struct ItemRecord {
    pub path: String,
    pub label: String,
    pub attributes: HashMap<String, String>,
}

fn username_of(attributes: &HashMap<String, String>) -> Option<&str> {
    USERNAME_ATTRIBUTES
        .iter()
        .filter_map(|key| attributes.get(*key))
        .map(String::as_str)
        .find(|value| !value.is_empty())
}

/// Turn item records into entries.
///
/// Every item has a password; the username comes from the first username
/// attribute present. Remaining attributes become secondary search terms,
/// ordered by key.
pub fn entries_from_records(records: Vec<ItemRecord>) -> Vec<Entry> {
    let entries = records
        .into_iter()
        .filter(|record| !record.path.is_empty())
        .map(|record| {
            let mut entry = Entry::new(record.path.as_str(), record.label.as_str())
                .with_field(Field::Password);
            if let Some(username) = username_of(&record.attributes) {
                entry = entry.with_username(username);
            }

            let mut keys: Vec<&String> = record
                .attributes
                .keys()
                .filter(|key| {
                    !EXCLUDED_ATTRIBUTES.contains(&key.as_str())
                        && !USERNAME_ATTRIBUTES.contains(&key.as_str())
                })
                .collect();
            keys.sort();
            for key in keys {
                entry = entry.with_attribute(record.attributes[key].as_str());
            }
            entry
        })
        .collect();
    dedup_entries(entries)
}

/// Map a client error to a backend error.
fn service_error(err: secret_service::Error) -> BackendError {
    match err {
        secret_service::Error::Locked => BackendError::Locked,
        secret_service::Error::Unavailable => {
            BackendError::Unavailable("secret service is not running".to_string())
        }
        other => BackendError::Unavailable(format!("secret service: {}", other)),
    }
}

fn connect() -> Result<SecretService<'static>, BackendError> {
    SecretService::connect(EncryptionType::Dh).map_err(service_error)
}

/// Why a blocking call produced no result.
enum Interrupted {
    TimedOut(Duration),
    Panicked(String),
}

impl Interrupted {
    fn into_backend(self) -> BackendError {
        match self {
            Interrupted::TimedOut(after) => {
                BackendError::Unavailable(format!("secret service timed out after {:?}", after))
            }
            Interrupted::Panicked(message) => BackendError::Unavailable(message),
        }
    }

    fn into_unlock(self) -> UnlockFailure {
        match self {
            Interrupted::TimedOut(after) => UnlockFailure::Timeout(after.as_secs()),
            Interrupted::Panicked(message) => UnlockFailure::Backend(message),
        }
    }
}

/// Run a blocking D-Bus conversation on the blocking pool.
async fn off_thread<T, F>(timeout: Duration, f: F) -> Result<T, Interrupted>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Err(_) => Err(Interrupted::TimedOut(timeout)),
        Ok(Err(e)) => Err(Interrupted::Panicked(format!("secret service task failed: {}", e))),
        Ok(Ok(value)) => Ok(value),
    }
}

fn list_records() -> Result<Vec<ItemRecord>, BackendError> {
    let service = connect()?;
    let collections = service.get_all_collections().map_err(service_error)?;

    let mut records = Vec::new();
    for collection in &collections {
        if collection.is_locked().map_err(service_error)? {
            return Err(BackendError::Locked);
        }
        for item in collection.get_all_items().map_err(service_error)? {
            records.push(ItemRecord {
                path: item.item_path.as_str().to_string(),
                label: item.get_label().map_err(service_error)?,
                attributes: item.get_attributes().map_err(service_error)?,
            });
        }
    }
    Ok(records)
}

fn fetch_item_field(entry_id: &str, field: Field) -> Result<SecretString, BackendError> {
    let missing = || BackendError::FieldNotFound {
        entry: entry_id.to_string(),
        field,
    };
    if field == Field::Totp {
        return Err(missing());
    }

    let service = connect()?;
    for collection in service.get_all_collections().map_err(service_error)? {
        let items = match collection.get_all_items() {
            Ok(items) => items,
            Err(secret_service::Error::Locked) => continue,
            Err(e) => return Err(service_error(e)),
        };
        let Some(item) = items
            .into_iter()
            .find(|item| item.item_path.as_str() == entry_id)
        else {
            continue;
        };

        if item.is_locked().map_err(service_error)? {
            return Err(BackendError::Locked);
        }
        return match field {
            Field::Username => {
                let attributes = item.get_attributes().map_err(service_error)?;
                username_of(&attributes)
                    .map(SecretString::from)
                    .ok_or_else(missing)
            }
            _ => {
                let secret = item.get_secret().map_err(service_error)?;
                match String::from_utf8(secret) {
                    Ok(text) if !text.is_empty() => Ok(SecretString::from(text)),
                    Ok(_) => Err(missing()),
                    Err(e) => {
                        let mut bytes = e.into_bytes();
                        bytes.zeroize();
                        Err(BackendError::Unavailable(
                            "secret is not valid UTF-8".to_string(),
                        ))
                    }
                }
            }
        };
    }
    Err(BackendError::EntryNotFound(entry_id.to_string()))
}

fn any_locked() -> Result<bool, BackendError> {
    let service = connect()?;
    for collection in service.get_all_collections().map_err(service_error)? {
        if collection.is_locked().map_err(service_error)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn unlock_collections() -> Result<(), UnlockFailure> {
    let service = connect().map_err(|e| UnlockFailure::Backend(e.to_string()))?;
    let collections = service
        .get_all_collections()
        .map_err(|e| UnlockFailure::Backend(service_error(e).to_string()))?;

    for collection in collections {
        let locked = collection
            .is_locked()
            .map_err(|e| UnlockFailure::Backend(service_error(e).to_string()))?;
        if !locked {
            continue;
        }
        match collection.unlock() {
            Ok(()) => {}
            Err(secret_service::Error::Prompt) => {
                return Err(UnlockFailure::Denied(
                    "secret service prompt dismissed".to_string(),
                ))
            }
            Err(e) => return Err(UnlockFailure::Backend(service_error(e).to_string())),
        }
    }
    Ok(())
}

/// Backend for the desktop Secret Service.
#[derive(Debug, Clone)]
pub struct SecretServiceVault {
    timeout: Duration,
    unlock_timeout: Duration,
}

impl SecretServiceVault {
    /// `timeout` bounds listing and fetching; `unlock_timeout` bounds the
    /// service's own unlock dialog.
    pub fn new(timeout: Duration, unlock_timeout: Duration) -> Self {
        Self {
            timeout,
            unlock_timeout,
        }
    }
}

impl VaultBackend for SecretServiceVault {
    fn name(&self) -> &'static str {
        "secret-service"
    }

    fn list_entries(&self) -> BoxFuture<'_, Result<Vec<Entry>, BackendError>> {
        Box::pin(async move {
            let records = off_thread(self.timeout, list_records)
                .await
                .map_err(Interrupted::into_backend)??;
            let entries = entries_from_records(records);
            debug!(count = entries.len(), "Listed secret service items");
            Ok(entries)
        })
    }

    fn fetch_field<'a>(
        &'a self,
        entry_id: &'a str,
        field: Field,
    ) -> BoxFuture<'a, Result<SecretString, BackendError>> {
        Box::pin(async move {
            debug!(entry = %entry_id, %field, "Fetching secret service item");
            let id = entry_id.to_string();
            off_thread(self.timeout, move || fetch_item_field(&id, field))
                .await
                .map_err(Interrupted::into_backend)?
        })
    }

    fn is_locked(&self) -> BoxFuture<'_, Result<bool, BackendError>> {
        Box::pin(async move {
            off_thread(self.timeout, any_locked)
                .await
                .map_err(Interrupted::into_backend)?
        })
    }

    fn unlock<'a>(
        &'a self,
        _prompt: &'a dyn UnlockPrompt,
    ) -> BoxFuture<'a, Result<(), UnlockFailure>> {
        // the service draws its own unlock dialog
        Box::pin(async move {
            let result = off_thread(self.unlock_timeout, unlock_collections)
                .await
                .map_err(Interrupted::into_unlock)
                .and_then(|r| r);
            match &result {
                Ok(()) => info!("Secret service unlocked"),
                Err(e) => warn!(error = %e, "Secret service unlock failed"),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, label: &str, attributes: &[(&str, &str)]) -> ItemRecord {
        ItemRecord {
            path: path.to_string(),
            label: label.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn records_become_entries() {
        let entries = entries_from_records(vec![
            record(
                "/org/freedesktop/secrets/collection/login/1",
                "Paypal",
                &[
                    ("UserName", "me@example.com"),
                    ("URL", "https://paypal.com"),
                    ("Path", "Root/Paypal"),
                    ("Uuid", "abc"),
                    ("Notes", "secret notes"),
                ],
            ),
            record("/org/freedesktop/secrets/collection/login/2", "Router", &[]),
        ]);

        assert_eq!(entries.len(), 2);
        let paypal = &entries[0];
        assert_eq!(paypal.id, "/org/freedesktop/secrets/collection/login/1");
        assert_eq!(paypal.title, "Paypal");
        assert_eq!(paypal.username.as_deref(), Some("me@example.com"));
        assert_eq!(paypal.attributes, vec!["https://paypal.com".to_string()]);
        assert!(paypal.has_field(Field::Password));
        assert!(paypal.has_field(Field::Username));

        let router = &entries[1];
        assert!(router.username.is_none());
        assert_eq!(router.fields().collect::<Vec<_>>(), vec![Field::Password]);
    }

    #[test]
    fn username_attribute_lookup_order() {
        let attributes: HashMap<String, String> = [("user", "b"), ("username", "a")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(username_of(&attributes), Some("a"));

        let attributes: HashMap<String, String> = [("username", ""), ("user", "b")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(username_of(&attributes), Some("b"));
    }

    #[test]
    fn secondary_attributes_are_sorted_by_key() {
        let entries = entries_from_records(vec![record(
            "/p",
            "Mail",
            &[("z-host", "imap.example.com"), ("a-port", "993")],
        )]);
        assert_eq!(
            entries[0].attributes,
            vec!["993".to_string(), "imap.example.com".to_string()]
        );
    }

    #[test]
    fn duplicate_paths_are_dropped() {
        let entries = entries_from_records(vec![
            record("/p", "First", &[]),
            record("/p", "Second", &[]),
            record("", "No path", &[]),
        ]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "First");
    }

    #[test]
    fn client_errors_are_normalized() {
        assert_eq!(
            service_error(secret_service::Error::Locked),
            BackendError::Locked
        );
        assert!(matches!(
            service_error(secret_service::Error::Unavailable),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            service_error(secret_service::Error::NoResult),
            BackendError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn totp_is_never_available() {
        let vault = SecretServiceVault::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(
            vault.fetch_field("/p", Field::Totp).await,
            Err(BackendError::FieldNotFound { .. })
        ));
    }
}
