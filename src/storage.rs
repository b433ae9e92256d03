//! Local snapshot persistence.
//!
//! State is saved whole under fixed keys, the same way the browser
//! widget used local storage: one JSON document per key. Timestamps are
//! written as RFC 3339 strings and come back as `DateTime<Utc>`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{self, SiteGenieConfig};
use crate::models::Conversation;

/// Key of the conversation snapshot.
pub const CHAT_STATE_KEY: &str = "chatState";
/// Key of the saved API configuration.
pub const API_CONFIG_KEY: &str = "siteGenieApiConfig";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot determine the application data directory")]
    NoDataDir,
}

/// The persisted part of the chat state. In-flight exchanges are not
/// saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChatState {
    pub conversations: Vec<Conversation>,
    pub current_conversation_id: Option<Uuid>,
}

/// Key/value snapshot storage.
///
/// Implementors provide raw `read`/`write`; typed accessors are built
/// on top.
pub trait SnapshotStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn load_state(&self) -> Result<Option<PersistedChatState>, StorageError> {
        decode(self.read(CHAT_STATE_KEY)?)
    }

    fn save_state(&self, state: &PersistedChatState) -> Result<(), StorageError> {
        self.write(CHAT_STATE_KEY, &serde_json::to_string(state)?)
    }

    fn load_config(&self) -> Result<Option<SiteGenieConfig>, StorageError> {
        decode(self.read(API_CONFIG_KEY)?)
    }

    fn save_config(&self, config: &SiteGenieConfig) -> Result<(), StorageError> {
        self.write(API_CONFIG_KEY, &serde_json::to_string_pretty(config)?)
    }
}

fn decode<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, StorageError> {
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

// ═══════════════════════════════════════════
// File-backed store
// ═══════════════════════════════════════════

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the platform application data directory.
    pub fn in_app_data_dir() -> Result<Self, StorageError> {
        config::app_data_dir()
            .map(Self::new)
            .ok_or(StorageError::NoDataDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a temp file in the same directory, then rename over the
    /// target so readers never see a partial snapshot.
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.flush()?;
        tmp.persist(self.path_for(key)).map_err(|e| e.error)?;
        Ok(())
    }
}

// ═══════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
