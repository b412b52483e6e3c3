//! Display name validation and persistence.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::error::ClientError;

/// Storage key of the chosen display name
pub const NICKNAME_KEY: &str = "chatUsername";

pub const MIN_NICKNAME_CHARS: usize = 2;
pub const MAX_NICKNAME_CHARS: usize = 30;

/// Why a nickname was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NicknameError {
    #[error("Please enter a nickname")]
    Empty,
    #[error("Nickname must be at least 2 characters")]
    TooShort,
    #[error("Nickname must be less than 30 characters")]
    TooLong,
}

/// Validate a nickname, returning it trimmed
pub fn validate_nickname(raw: &str) -> Result<String, NicknameError> {
    let nickname = raw.trim();
    let chars = nickname.chars().count();

    if chars == 0 {
        Err(NicknameError::Empty)
    } else if chars < MIN_NICKNAME_CHARS {
        Err(NicknameError::TooShort)
    } else if chars > MAX_NICKNAME_CHARS {
        Err(NicknameError::TooLong)
    } else {
        Ok(nickname.to_string())
    }
}

/// Small key/value file holding the user's identity
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.noren/identity.json`, or the working directory without `HOME`
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(".noren")
            .join("identity.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, ClientError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| ClientError::Identity(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(ClientError::Identity(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// The saved nickname, if any
    pub fn load(&self) -> Result<Option<String>, ClientError> {
        Ok(self.read_entries()?.remove(NICKNAME_KEY))
    }

    /// Persist `nickname`, keeping any other entries
    pub fn save(&self, nickname: &str) -> Result<(), ClientError> {
        let mut entries = self.read_entries().unwrap_or_default();
        entries.insert(NICKNAME_KEY.to_string(), nickname.to_string());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientError::Identity(format!("{}: {}", parent.display(), e)))?;
        }
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| ClientError::Identity(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| ClientError::Identity(format!("{}: {}", self.path.display(), e)))?;

        tracing::debug!("Saved nickname to {}", self.path.display());
        Ok(())
    }
}
