//! `rbw` command lines and output parsing.
//!
//! `rbw` runs its own agent which holds the unlocked vault and draws its own
//! pinentry on `rbw unlock`, so no password passes through the daemon.

use secrecy::SecretString;
use serde::Deserialize;
use vault_runner_core::{dedup_entries, BackendError, Entry, Field};
use zeroize::Zeroize;

pub const UNLOCKED_ARGS: &[&str] = &["unlocked"];
pub const LIST_ARGS: &[&str] = &["list", "--fields", "id,name,user,folder"];
pub const UNLOCK_ARGS: &[&str] = &["unlock"];
pub const SYNC_ARGS: &[&str] = &["sync"];
pub const LOCK_ARGS: &[&str] = &["lock"];

/// Arguments that print one field of an entry.
pub fn fetch_args(entry_id: &str, field: Field) -> Vec<&str> {
    match field {
        Field::Totp => vec!["code", entry_id],
        Field::Password | Field::Username => vec!["get", "--raw", entry_id],
    }
}

/// Parse `rbw list --fields id,name,user,folder` output.
///
/// Every listed entry exposes its password; the folder becomes a secondary
/// search attribute. The listing does not say which entries have a TOTP
/// secret, so entries never advertise [`Field::Totp`]. Running `copy-totp`
/// on an entry still works through `rbw code`, and entries without a
/// secret answer with `FieldNotFound`.
pub fn parse_list(text: &str) -> Vec<Entry> {
    let entries = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut columns = line.split('\t');
            let id = columns.next()?.trim();
            let name = columns.next()?;
            let user = columns.next().unwrap_or_default();
            let folder = columns.next().unwrap_or_default();
            if id.is_empty() {
                return None;
            }
            Some(
                Entry::new(id, name)
                    .with_field(Field::Password)
                    .with_username(user)
                    .with_attribute(folder),
            )
        })
        .collect();
    dedup_entries(entries)
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    data: Option<RawData>,
}

#[derive(Deserialize)]
struct RawData {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Extract the username or password from `rbw get --raw` output.
pub fn parse_raw_field(
    json: &str,
    entry_id: &str,
    field: Field,
) -> Result<SecretString, BackendError> {
    let raw: RawEntry = serde_json::from_str(json)
        .map_err(|e| BackendError::Unavailable(format!("malformed rbw output: {}", e)))?;

    let missing = || BackendError::FieldNotFound {
        entry: entry_id.to_string(),
        field,
    };
    let data = raw.data.ok_or_else(missing)?;
    let (mut wanted, mut other) = match field {
        Field::Password => (data.password, data.username),
        Field::Username => (data.username, data.password),
        Field::Totp => return Err(missing()),
    };
    other.zeroize();

    match wanted.take() {
        Some(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(missing()),
    }
}

/// Extract the code from `rbw code` output.
pub fn parse_code(text: &str, entry_id: &str) -> Result<SecretString, BackendError> {
    let code = text.trim();
    if code.is_empty() {
        return Err(BackendError::FieldNotFound {
            entry: entry_id.to_string(),
            field: Field::Totp,
        });
    }
    Ok(SecretString::from(code))
}

/// Map `rbw` stderr to a backend error.
pub fn classify_stderr(stderr: &str, entry_id: Option<&str>, field: Option<Field>) -> BackendError {
    let lower = stderr.to_lowercase();
    if lower.contains("locked") {
        return BackendError::Locked;
    }
    if let Some(id) = entry_id {
        if lower.contains("no entry found") || lower.contains("couldn't find entry") {
            return BackendError::EntryNotFound(id.to_string());
        }
        if let Some(field) = field {
            if lower.contains("totp") || lower.contains("not a login") {
                return BackendError::FieldNotFound {
                    entry: id.to_string(),
                    field,
                };
            }
        }
    }
    BackendError::Unavailable(format!("rbw: {}", stderr.trim()))
}
