//! Bitwarden CLI (`bw`) command lines and output parsing.
//!
//! `bw` keeps no unlock state of its own between invocations: `bw unlock
//! --raw` prints a session key, and every later command needs that key in
//! `BW_SESSION`. The master password is handed to `bw unlock` through an
//! environment variable of the child process only.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use vault_runner_core::{dedup_entries, BackendError, Entry, Field};
use zeroize::Zeroize;

/// Environment variable carrying the session key.
pub const SESSION_ENV: &str = "BW_SESSION";

/// Environment variable carrying the master password to `bw unlock`.
pub const PASSWORD_ENV: &str = "VAULT_RUNNER_BW_PASSWORD";

pub const STATUS_ARGS: &[&str] = &["status", "--nointeraction"];
pub const LIST_ARGS: &[&str] = &["list", "items", "--response", "--nointeraction"];
pub const UNLOCK_ARGS: &[&str] = &["unlock", "--raw", "--passwordenv", PASSWORD_ENV, "--nointeraction"];
pub const SYNC_ARGS: &[&str] = &["sync", "--nointeraction"];
pub const LOCK_ARGS: &[&str] = &["lock", "--nointeraction"];

/// Arguments that print one field of an item.
pub fn fetch_args(entry_id: &str, field: Field) -> Vec<&str> {
    match field {
        Field::Totp => vec!["get", "totp", entry_id, "--nointeraction"],
        Field::Password | Field::Username => vec!["get", "item", entry_id, "--nointeraction"],
    }
}

#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ListData>,
}

#[derive(Deserialize)]
struct ListData {
    #[serde(default)]
    data: Vec<ListedItem>,
}

#[derive(Deserialize)]
struct ListedItem {
    id: String,
    name: String,
    #[serde(default)]
    login: Option<ListedLogin>,
}

#[derive(Deserialize)]
struct ListedLogin {
    #[serde(default)]
    username: Option<String>,
    #[serde(default, deserialize_with = "non_empty_secret")]
    password: bool,
    #[serde(default, deserialize_with = "non_empty_secret")]
    totp: bool,
    #[serde(default)]
    uris: Option<Vec<ListedUri>>,
}

#[derive(Deserialize)]
struct ListedUri {
    #[serde(default)]
    uri: Option<String>,
}

/// Reads a secret string only to learn whether it is set, then wipes it.
fn non_empty_secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(mut secret) => {
            let present = !secret.is_empty();
            secret.zeroize();
            present
        }
        None => false,
    })
}

/// Parse `bw list items --response` output.
///
/// Items without a login username and password (cards, identities, notes)
/// are skipped.
pub fn parse_item_list(json: &str) -> Result<Vec<Entry>, BackendError> {
    let envelope: Envelope = serde_json::from_str(json)
        .map_err(|e| BackendError::Unavailable(format!("malformed bw output: {}", e)))?;

    if !envelope.success {
        let message = envelope.message.unwrap_or_default();
        return Err(classify_message(&message, None));
    }

    let items = envelope.data.map(|d| d.data).unwrap_or_default();
    let entries = items
        .into_iter()
        .filter_map(|item| {
            let login = item.login?;
            let username = login.username.unwrap_or_default();
            if username.is_empty() && !login.password {
                return None;
            }

            let mut entry = Entry::new(item.id, item.name).with_username(username);
            if login.password {
                entry = entry.with_field(Field::Password);
            }
            if login.totp {
                entry = entry.with_field(Field::Totp);
            }
            for uri in login.uris.unwrap_or_default().into_iter().filter_map(|u| u.uri) {
                entry = entry.with_attribute(uri);
            }
            Some(entry)
        })
        .collect();

    Ok(dedup_entries(entries))
}

#[derive(Deserialize)]
struct Item {
    #[serde(default)]
    login: Option<ItemLogin>,
}

#[derive(Deserialize)]
struct ItemLogin {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Extract the username or password from `bw get item` output.
pub fn parse_item_field(
    json: &str,
    entry_id: &str,
    field: Field,
) -> Result<SecretString, BackendError> {
    let item: Item = serde_json::from_str(json)
        .map_err(|e| BackendError::Unavailable(format!("malformed bw output: {}", e)))?;

    let missing = || BackendError::FieldNotFound {
        entry: entry_id.to_string(),
        field,
    };
    let login = item.login.ok_or_else(missing)?;
    let (mut wanted, mut other) = match field {
        Field::Password => (login.password, login.username),
        Field::Username => (login.username, login.password),
        Field::Totp => return Err(missing()),
    };
    other.zeroize();

    match wanted.take() {
        Some(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(missing()),
    }
}

/// Extract the code from `bw get totp` output.
pub fn parse_totp(text: &str, entry_id: &str) -> Result<SecretString, BackendError> {
    let code = text.trim();
    if code.is_empty() {
        return Err(BackendError::FieldNotFound {
            entry: entry_id.to_string(),
            field: Field::Totp,
        });
    }
    Ok(SecretString::from(code))
}

#[derive(Deserialize)]
struct Status {
    status: String,
}

/// Parse `bw status`; returns whether the vault is locked.
pub fn parse_status(json: &str) -> Result<bool, BackendError> {
    let status: Status = serde_json::from_str(json)
        .map_err(|e| BackendError::Unavailable(format!("malformed bw status: {}", e)))?;
    match status.status.as_str() {
        "unlocked" => Ok(false),
        "locked" => Ok(true),
        other => Err(BackendError::Unavailable(format!(
            "bw status is '{}', log in with `bw login` first",
            other
        ))),
    }
}

/// Map a `bw` error message to a backend error.
pub fn classify_message(message: &str, entry_id: Option<&str>) -> BackendError {
    let lower = message.to_lowercase();
    if lower.contains("locked") {
        return BackendError::Locked;
    }
    if let Some(id) = entry_id {
        if lower.contains("not found") {
            return BackendError::EntryNotFound(id.to_string());
        }
    }
    BackendError::Unavailable(format!("bw: {}", message.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const LISTING: &str = r#"{
      "success": true,
      "data": {
        "object": "list",
        "data": [
          {
            "object": "item",
            "id": "0f1a",
            "name": "GitHub",
            "type": 1,
            "login": {
              "username": "octocat",
              "password": "gh-secret",
              "totp": "otpauth://totp/GitHub?secret=ABC",
              "uris": [{"match": null, "uri": "https://github.com"}]
            }
          },
          {
            "object": "item",
            "id": "1b2c",
            "name": "Visa",
            "type": 3,
            "card": {"number": "4111"}
          },
          {
            "object": "item",
            "id": "2c3d",
            "name": "Empty login",
            "type": 1,
            "login": {"username": null, "password": null, "totp": null}
          },
          {
            "object": "item",
            "id": "3d4e",
            "name": "Wifi",
            "type": 1,
            "login": {"username": "", "password": "wifi-pass", "totp": null, "uris": null}
          },
          {
            "object": "item",
            "id": "0f1a",
            "name": "GitHub duplicate",
            "type": 1,
            "login": {"username": "x", "password": "y"}
          }
        ]
      }
    }"#;

    #[test]
    fn list_keeps_logins_only() {
        let entries = parse_item_list(LISTING).unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["0f1a", "3d4e"]);
    }

    #[test]
    fn list_maps_fields_and_attributes() {
        let entries = parse_item_list(LISTING).unwrap();

        let github = &entries[0];
        assert_eq!(github.title, "GitHub");
        assert_eq!(github.username.as_deref(), Some("octocat"));
        assert_eq!(
            github.fields().collect::<Vec<_>>(),
            vec![Field::Password, Field::Username, Field::Totp]
        );
        assert_eq!(github.attributes, vec!["https://github.com".to_string()]);

        let wifi = &entries[1];
        assert!(wifi.username.is_none());
        assert_eq!(wifi.fields().collect::<Vec<_>>(), vec![Field::Password]);
    }

    #[test]
    fn list_failure_envelope_is_classified() {
        let json = r#"{"success":false,"message":"Vault is locked."}"#;
        assert_eq!(parse_item_list(json), Err(BackendError::Locked));

        let json = r#"{"success":false,"message":"Something broke."}"#;
        assert!(matches!(
            parse_item_list(json),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn malformed_list_is_unavailable() {
        assert!(matches!(
            parse_item_list("? Master password: [input is hidden]"),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn item_field_extraction() {
        let json = r#"{"id":"0f1a","name":"GitHub","login":{"username":"octocat","password":"gh-secret"}}"#;

        let password = parse_item_field(json, "0f1a", Field::Password).unwrap();
        assert_eq!(password.expose_secret(), "gh-secret");

        let username = parse_item_field(json, "0f1a", Field::Username).unwrap();
        assert_eq!(username.expose_secret(), "octocat");
    }

    #[test]
    fn item_without_field_is_field_not_found() {
        let json = r#"{"id":"0f1a","name":"Wifi","login":{"username":"","password":"p"}}"#;
        assert_eq!(
            parse_item_field(json, "0f1a", Field::Username).unwrap_err(),
            BackendError::FieldNotFound {
                entry: "0f1a".into(),
                field: Field::Username
            }
        );

        let json = r#"{"id":"1b2c","name":"Visa","card":{}}"#;
        assert!(matches!(
            parse_item_field(json, "1b2c", Field::Password),
            Err(BackendError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn totp_output_is_trimmed() {
        assert_eq!(
            parse_totp("123456\n", "0f1a").unwrap().expose_secret(),
            "123456"
        );
        assert!(matches!(
            parse_totp("\n", "0f1a"),
            Err(BackendError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn status_parsing() {
        assert_eq!(parse_status(r#"{"status":"unlocked"}"#), Ok(false));
        assert_eq!(
            parse_status(r#"{"serverUrl":null,"status":"locked"}"#),
            Ok(true)
        );
        assert!(matches!(
            parse_status(r#"{"status":"unauthenticated"}"#),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn message_classification() {
        assert_eq!(classify_message("Vault is locked.", None), BackendError::Locked);
        assert_eq!(
            classify_message("Not found.", Some("abc")),
            BackendError::EntryNotFound("abc".into())
        );
        assert!(matches!(
            classify_message("Not found.", None),
            BackendError::Unavailable(_)
        ));
    }

    #[test]
    fn fetch_args_per_field() {
        assert_eq!(fetch_args("x", Field::Totp)[..2], ["get", "totp"]);
        assert_eq!(fetch_args("x", Field::Password)[..2], ["get", "item"]);
        assert_eq!(fetch_args("x", Field::Username)[2], "x");
    }
}
