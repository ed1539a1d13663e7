//! Secure terminal config storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the kernel keyring. The SQLite `local_settings` table keeps
//! a mirror so a terminal whose OS store was wiped can re-hydrate without
//! re-onboarding.

use keyring::Entry;
use serde::Deserialize;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::api;
use crate::db::{self, DbState};

const SERVICE_NAME: &str = "the-small-stocktake";

// Credential keys
pub const KEY_ADMIN_URL: &str = "admin_dashboard_url";
pub const KEY_TERMINAL_ID: &str = "terminal_id";
pub const KEY_API_KEY: &str = "stocktake_api_key";
pub const KEY_LOCATION_ID: &str = "location_id";
pub const KEY_ORG_ID: &str = "organization_id";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[
    KEY_ADMIN_URL,
    KEY_TERMINAL_ID,
    KEY_API_KEY,
    KEY_LOCATION_ID,
    KEY_ORG_ID,
];

/// Keys mirrored into `local_settings` for re-hydration. The API key is
/// deliberately excluded — it lives only in the OS store.
const MIRRORED_KEYS: &[&str] = &[KEY_ADMIN_URL, KEY_TERMINAL_ID, KEY_LOCATION_ID, KEY_ORG_ID];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

/// The terminal is considered configured when admin URL, terminal ID, and API
/// key are all present in the credential store.
pub fn is_configured() -> bool {
    has_credential(KEY_ADMIN_URL) && has_credential(KEY_TERMINAL_ID) && has_credential(KEY_API_KEY)
}

// ---------------------------------------------------------------------------
// Onboarding
// ---------------------------------------------------------------------------

/// Terminal credentials received during onboarding. The `api_key` field
/// accepts either a bare key or a full connection string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalCredentials {
    #[serde(alias = "api_key", alias = "stocktake_api_key")]
    pub api_key: String,
    #[serde(default, alias = "terminal_id")]
    pub terminal_id: Option<String>,
    #[serde(
        default,
        alias = "adminDashboardUrl",
        alias = "admin_dashboard_url",
        alias = "admin_url"
    )]
    pub admin_url: Option<String>,
    #[serde(default, alias = "location_id")]
    pub location_id: Option<String>,
    #[serde(default, alias = "organization_id")]
    pub organization_id: Option<String>,
}

/// Store terminal credentials received during onboarding.
///
/// A pasted connection string overrides the individual fields it carries.
/// Mirrors the non-secret values into `local_settings` when a database is
/// available.
pub fn update_terminal_credentials(
    db: Option<&DbState>,
    mut creds: TerminalCredentials,
) -> Result<(), String> {
    let mut api_key = creds.api_key.trim().to_string();
    let mut terminal_id = creds.terminal_id.take().filter(|s| !s.trim().is_empty());
    let mut admin_url = creds.admin_url.take().filter(|s| !s.trim().is_empty());

    if let Some(decoded_key) = api::extract_api_key_from_connection_string(&creds.api_key) {
        api_key.zeroize();
        api_key = decoded_key;
        if let Some(decoded_tid) =
            api::extract_terminal_id_from_connection_string(&creds.api_key)
        {
            terminal_id = Some(decoded_tid);
        }
        if let Some(decoded_url) = api::extract_admin_url_from_connection_string(&creds.api_key) {
            admin_url = Some(decoded_url);
        }
    }
    creds.api_key.zeroize();

    let terminal_id = terminal_id.ok_or("Missing required field: terminalId")?;
    if api_key.trim().is_empty() {
        return Err("Missing required field: apiKey".to_string());
    }

    set_credential(KEY_TERMINAL_ID, terminal_id.trim())?;
    set_credential(KEY_API_KEY, api_key.trim())?;
    api_key.zeroize();

    if let Some(url) = admin_url.as_deref() {
        let normalized = api::normalize_admin_url(url);
        if !normalized.trim().is_empty() {
            set_credential(KEY_ADMIN_URL, normalized.trim())?;
        }
    }
    if let Some(lid) = creds.location_id.as_deref().filter(|s| !s.trim().is_empty()) {
        set_credential(KEY_LOCATION_ID, lid.trim())?;
    }
    if let Some(oid) = creds
        .organization_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        set_credential(KEY_ORG_ID, oid.trim())?;
    }

    if let Some(db) = db {
        mirror_to_local_settings(db);
    }

    info!(terminal_id = %terminal_id, "terminal credentials updated");
    Ok(())
}

/// Delete every stored credential (factory reset).
pub fn factory_reset() -> Result<(), String> {
    info!("performing factory reset – deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// local_settings mirror
// ---------------------------------------------------------------------------

/// Copy the non-secret credentials into `local_settings`.
fn mirror_to_local_settings(db: &DbState) {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "settings mirror: db lock poisoned");
            return;
        }
    };
    for key in MIRRORED_KEYS {
        if let Some(value) = get_credential(key) {
            if let Err(e) = db::set_setting(&conn, "terminal", key, &value) {
                warn!(key, error = %e, "settings mirror: write failed");
            }
        }
    }
}

/// Fill keyring gaps from the `local_settings` mirror. Used at startup so a
/// terminal whose OS store was cleared keeps its identity (the API key is
/// never mirrored and still requires re-onboarding).
pub fn hydrate_from_local_settings(db: &DbState) {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "credential hydration: db lock poisoned");
            return;
        }
    };
    for key in MIRRORED_KEYS {
        if has_credential(key) {
            continue;
        }
        if let Some(value) = db::get_setting(&conn, "terminal", key) {
            match set_credential(key, &value) {
                Ok(()) => info!(key, "credential hydrated from local settings"),
                Err(e) => warn!(key, error = %e, "credential hydration failed"),
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onboarding_payload_accepts_snake_and_camel_case() {
        let camel: TerminalCredentials = serde_json::from_str(
            r#"{"apiKey": "sk-1", "terminalId": "t-1", "adminDashboardUrl": "admin.thesmall.app"}"#,
        )
        .unwrap();
        assert_eq!(camel.api_key, "sk-1");
        assert_eq!(camel.terminal_id.as_deref(), Some("t-1"));
        assert_eq!(camel.admin_url.as_deref(), Some("admin.thesmall.app"));

        let snake: TerminalCredentials = serde_json::from_str(
            r#"{"api_key": "sk-2", "terminal_id": "t-2", "location_id": "loc-9"}"#,
        )
        .unwrap();
        assert_eq!(snake.api_key, "sk-2");
        assert_eq!(snake.location_id.as_deref(), Some("loc-9"));
    }

    #[test]
    fn missing_terminal_id_is_rejected_before_any_write() {
        let creds = TerminalCredentials {
            api_key: "sk-raw-key".into(),
            terminal_id: None,
            admin_url: None,
            location_id: None,
            organization_id: None,
        };
        let err = update_terminal_credentials(None, creds).unwrap_err();
        assert!(err.contains("terminalId"));
    }
}
