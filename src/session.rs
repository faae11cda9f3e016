//! Signed-in session and its persisted mirror.
//!
//! The mirror keeps the two values the front end needs to skip sign-in on the
//! next launch: the user identifier as plain text and the fiscal year as a
//! JSON-encoded string.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: String,
    pub year: Value,
}

impl Session {
    pub fn new(user: impl Into<String>, year: Value) -> Self {
        Self {
            user: user.into(),
            year,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: Option<PathBuf>,
}

impl SessionStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn detached() -> Self {
        Self { path: None }
    }

    /// Restores the persisted session when both values are present and
    /// non-empty.
    pub fn load(&self) -> AppResult<Option<Session>> {
        let Some(path) = self.path.as_deref() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let stored: Value = match serde_json::from_str(raw.as_str()) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };
        let user = stored.get("user").and_then(|v| v.as_str()).unwrap_or_default();
        let year = stored
            .get("year")
            .and_then(|v| v.as_str())
            .and_then(|encoded| serde_json::from_str::<Value>(encoded).ok())
            .unwrap_or(Value::Null);
        if user.is_empty() || !is_truthy(&year) {
            return Ok(None);
        }
        Ok(Some(Session::new(user, year)))
    }

    pub fn save(&self, session: &Session) -> AppResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(&json!({
            "user": session.user,
            "year": serde_json::to_string(&session.year)?,
        }))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        debug!(user = session.user.as_str(), "session persisted");
        Ok(())
    }

    pub fn clear(&self) -> AppResult<()> {
        if let Some(path) = self.path.as_deref() {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_restores_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::at(dir.path().join("session.json"));
        assert_eq!(store.load().unwrap(), None);

        store.save(&Session::new("A1", json!(2024))).unwrap();
        let raw = fs::read_to_string(dir.path().join("session.json")).unwrap();
        let stored: Value = serde_json::from_str(raw.as_str()).unwrap();
        assert_eq!(stored["year"], "2024");
        assert_eq!(store.load().unwrap(), Some(Session::new("A1", json!(2024))));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn missing_year_does_not_restore() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::at(dir.path().join("session.json"));
        store.save(&Session::new("A1", Value::Null)).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
