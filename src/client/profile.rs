//! Persisted viewer profile
//!
//! A small JSON file holding the display name attached to uploads. Loading
//! is best effort: a missing or unreadable file yields the default profile.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::constants::MAX_USERNAME_CHARS;

const DEFAULT_USERNAME: &str = "guest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default = "default_username")]
    pub username: String,
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            username: default_username(),
        }
    }
}

impl Profile {
    pub fn new(username: &str) -> Self {
        Self {
            username: normalize(username),
        }
    }

    /// Load the profile at `path`, falling back to the default
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No profile, using default");
                return Self::default();
            }
        };

        match serde_json::from_str::<Profile>(&text) {
            Ok(profile) => Self::new(&profile.username),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable profile, using default");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn normalize(username: &str) -> String {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return default_username();
    }
    trimmed.chars().take(MAX_USERNAME_CHARS).collect()
}
