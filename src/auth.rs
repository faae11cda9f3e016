use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::model::IniDocument;
use crate::session::{Session, SessionStore};
use crate::store::{server_timestamp, DocumentStore};

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 200_000;
const HASH_PREFIX: &str = "pbkdf2";
const LOG_KEY_PREFIX: &str = "GT_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Root,
}

impl Role {
    fn password_field(self) -> &'static str {
        match self {
            Self::Admin => "adminPW",
            Self::Root => "rootPW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignInOutcome {
    /// Identifier or password left empty; nothing was checked.
    Skipped,
    /// The credential document is missing.
    Unavailable,
    /// No pair matched; the caller clears both inputs.
    Rejected,
    SignedIn {
        session: Session,
        role: Role,
        log_key: Option<String>,
    },
}

pub fn sign_in(
    store: &DocumentStore,
    sessions: &SessionStore,
    config: &AppConfig,
    number: &str,
    pw: &str,
) -> AppResult<SignInOutcome> {
    if number.is_empty() || pw.is_empty() {
        return Ok(SignInOutcome::Skipped);
    }
    let ini_path = config.ini_path();
    let Some(doc) = store.get(ini_path.as_str())? else {
        warn!(path = ini_path.as_str(), "credential document not found");
        return Ok(SignInOutcome::Unavailable);
    };
    let ini = IniDocument::from_document(&doc);
    let Some(role) = match_credential(&ini, number, pw) else {
        info!("sign-in rejected");
        return Ok(SignInOutcome::Rejected);
    };

    let session = Session::new(number, ini.year.clone());
    sessions.save(&session)?;

    let log_key = if role == Role::Admin {
        let key = unique_log_key(&doc.data, chrono::Utc::now().timestamp_millis());
        store.set_merge(
            ini_path.as_str(),
            json!({ "log": { key.as_str(): server_timestamp() } }),
        )?;
        Some(key)
    } else {
        None
    };
    info!(user = number, ?role, "signed in");
    Ok(SignInOutcome::SignedIn {
        session,
        role,
        log_key,
    })
}

pub fn sign_out(sessions: &SessionStore) -> AppResult<()> {
    sessions.clear()
}

/// Replaces the password of the pair identified by `number`. Returns `false`
/// when the identifier or current password does not match.
pub fn change_password(
    store: &DocumentStore,
    config: &AppConfig,
    number: &str,
    current: &str,
    next: &str,
    iterations: u32,
) -> AppResult<bool> {
    if next.trim().is_empty() {
        return Err(AppError::invalid("password", "new password is empty"));
    }
    let ini_path = config.ini_path();
    let Some(doc) = store.get(ini_path.as_str())? else {
        return Err(AppError::MissingDocument { path: ini_path });
    };
    let ini = IniDocument::from_document(&doc);
    let Some(role) = match_credential(&ini, number, current) else {
        return Ok(false);
    };
    let hashed = hash_secret(next, iterations);
    store.set_merge(ini_path.as_str(), json!({ role.password_field(): hashed }))?;
    info!(user = number, ?role, "password changed");
    Ok(true)
}

fn match_credential(ini: &IniDocument, number: &str, pw: &str) -> Option<Role> {
    if !ini.admin_id.is_empty() && number == ini.admin_id && verify_secret(&ini.admin_pw, pw) {
        return Some(Role::Admin);
    }
    if !ini.root_id.is_empty() && number == ini.root_id && verify_secret(&ini.root_pw, pw) {
        return Some(Role::Root);
    }
    None
}

/// `GT_<millis>`, bumped past keys already present in the log map.
fn unique_log_key(ini: &serde_json::Value, mut millis: i64) -> String {
    let log = ini.get("log").and_then(|v| v.as_object());
    loop {
        let key = format!("{LOG_KEY_PREFIX}{millis}");
        if !log.is_some_and(|entries| entries.contains_key(key.as_str())) {
            return key;
        }
        millis += 1;
    }
}

/// Stored passwords are either plaintext, as provisioned, or
/// `pbkdf2$<iterations>$<salt>$<hash>` once changed here.
pub fn verify_secret(stored: &str, provided: &str) -> bool {
    if stored.is_empty() || provided.is_empty() {
        return false;
    }
    let parts: Vec<&str> = stored.split('$').collect();
    match parts.as_slice() {
        [HASH_PREFIX, iterations, salt, hash] => {
            let Ok(iterations) = iterations.parse::<u32>() else {
                return false;
            };
            let Ok(salt) = B64.decode(salt) else {
                return false;
            };
            let key = derive_key(provided, salt.as_slice(), iterations.max(1));
            B64.encode(key) == *hash
        }
        _ => stored == provided,
    }
}

pub fn hash_secret(password: &str, iterations: u32) -> String {
    let iterations = iterations.max(1);
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(password, &salt, iterations);
    format!(
        "{HASH_PREFIX}${iterations}${}${}",
        B64.encode(salt),
        B64.encode(key)
    )
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (DocumentStore, AppConfig) {
        let store = DocumentStore::in_memory();
        store
            .set(
                "manage/ini",
                json!({
                    "adminID": "adminID",
                    "adminPW": "adminPW",
                    "rootID": "rootID",
                    "rootPW": "rootPW",
                    "year": 2024,
                    "log": { "GT_1": "2024-01-01T00:00:00Z" }
                }),
            )
            .unwrap();
        (store, AppConfig::default())
    }

    #[test]
    fn admin_sign_in_appends_a_log_entry() {
        let (store, config) = seeded();
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = SessionStore::at(dir.path().join("session.json"));
        let outcome = sign_in(&store, &sessions, &config, "adminID", "adminPW").unwrap();
        let SignInOutcome::SignedIn { role, log_key, session } = outcome else {
            panic!("expected sign-in");
        };
        assert_eq!(role, Role::Admin);
        assert_eq!(session.year, json!(2024));
        let key = log_key.unwrap();
        assert!(key.starts_with("GT_"));

        let ini = store.get("manage/ini").unwrap().unwrap();
        let log = ini.data["log"].as_object().unwrap();
        assert!(log.contains_key("GT_1"));
        assert!(log.contains_key(key.as_str()));
        assert_eq!(sessions.load().unwrap().unwrap().user, "adminID");
    }

    #[test]
    fn root_sign_in_does_not_log() {
        let (store, config) = seeded();
        let outcome =
            sign_in(&store, &SessionStore::detached(), &config, "rootID", "rootPW").unwrap();
        assert!(matches!(
            outcome,
            SignInOutcome::SignedIn { role: Role::Root, log_key: None, .. }
        ));
        let ini = store.get("manage/ini").unwrap().unwrap();
        assert_eq!(ini.data["log"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn mismatched_or_empty_credentials() {
        let (store, config) = seeded();
        let sessions = SessionStore::detached();
        assert_eq!(
            sign_in(&store, &sessions, &config, "adminID", "rootPW").unwrap(),
            SignInOutcome::Rejected
        );
        assert_eq!(
            sign_in(&store, &sessions, &config, "", "adminPW").unwrap(),
            SignInOutcome::Skipped
        );
        let empty = DocumentStore::in_memory();
        assert_eq!(
            sign_in(&empty, &sessions, &config, "adminID", "adminPW").unwrap(),
            SignInOutcome::Unavailable
        );
    }

    #[test]
    fn log_keys_never_collide() {
        let ini = json!({ "log": { "GT_5": 1, "GT_6": 1 } });
        assert_eq!(unique_log_key(&ini, 5), "GT_7");
        assert_eq!(unique_log_key(&json!({}), 5), "GT_5");
    }

    #[test]
    fn changed_password_is_hashed_and_verifies() {
        let (store, config) = seeded();
        assert!(!change_password(&store, &config, "rootID", "wrong", "next", 10).unwrap());
        assert!(change_password(&store, &config, "rootID", "rootPW", "next", 10).unwrap());

        let ini = store.get("manage/ini").unwrap().unwrap();
        let stored = ini.data["rootPW"].as_str().unwrap();
        assert!(stored.starts_with("pbkdf2$10$"));
        assert_eq!(ini.data["adminPW"], "adminPW");

        let outcome =
            sign_in(&store, &SessionStore::detached(), &config, "rootID", "next").unwrap();
        assert!(matches!(outcome, SignInOutcome::SignedIn { .. }));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_secret("pbkdf2$x$AAAA$BBBB", "pw"));
        assert!(!verify_secret("pbkdf2$10$***$BBBB", "pw"));
        assert!(!verify_secret("", ""));
    }
}
