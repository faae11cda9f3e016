use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppResult;

pub const CONFIG_FILE: &str = "config.json";
pub const SESSION_FILE: &str = "session.json";
const DEFAULT_STORE_FILE: &str = "checklist.json";
const DEFAULT_ROOT_COLLECTION: &str = "manage";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store_file: String,
    pub root_collection: String,
    pub mental_pass_threshold: i64,
    pub physical_pass_threshold: i64,
    /// Score unknown answer labels at the top of the scale instead of
    /// rejecting the submission.
    pub lenient_scoring: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_file: DEFAULT_STORE_FILE.to_string(),
            root_collection: DEFAULT_ROOT_COLLECTION.to_string(),
            mental_pass_threshold: 10,
            physical_pass_threshold: 76,
            lenient_scoring: false,
        }
    }
}

impl AppConfig {
    /// `config.json` under `root` when present, then environment overrides.
    pub fn load(root: &Path) -> AppResult<Self> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let raw = fs::read_to_string(path.as_path())?;
            match serde_json::from_str::<AppConfig>(raw.as_str()) {
                Ok(value) => value,
                Err(err) => {
                    warn!(path = %path.display(), %err, "ignoring unreadable config file");
                    AppConfig::default()
                }
            }
        } else {
            AppConfig::default()
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(file) = lookup("CHECKLIST_STORE_FILE").filter(|v| !v.trim().is_empty()) {
            self.store_file = file.trim().to_string();
        }
        if let Some(flag) = lookup("CHECKLIST_LENIENT_SCORING") {
            self.lenient_scoring = parse_flag(flag.as_str());
        }
        if let Some(value) = lookup("CHECKLIST_MENTAL_PASS").and_then(|v| v.trim().parse().ok()) {
            self.mental_pass_threshold = value;
        }
        if let Some(value) = lookup("CHECKLIST_PHYSICAL_PASS").and_then(|v| v.trim().parse().ok()) {
            self.physical_pass_threshold = value;
        }
    }

    pub fn store_path(&self, root: &Path) -> PathBuf {
        root.join(self.store_file.as_str())
    }

    pub fn users_collection(&self) -> String {
        format!("{}/meta/users", self.root_collection)
    }

    pub fn user_path(&self, user_id: &str) -> String {
        format!("{}/{user_id}", self.users_collection())
    }

    pub fn ini_path(&self) -> String {
        format!("{}/{}", self.root_collection, crate::model::INI_DOC)
    }

    /// Document path for a record reference relative to the root collection.
    pub fn record_path(&self, reference: &str) -> String {
        format!("{}/{}", self.root_collection, reference.trim_matches('/'))
    }
}

pub fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "off" | "no"
    )
}
