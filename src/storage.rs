//! String-keyed persistence. Every key is owned by exactly one component:
//! the adventure writes [`SESSION_KEY`], the vocabulary deck writes
//! [`VOCABULARY_KEY`], and settings write the speech and language keys.

use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const SESSION_KEY: &str = "rpgGameState";
pub const VOCABULARY_KEY: &str = "vocabWords";
pub const VOICE_KEY: &str = "speechSettings_voiceURI";
pub const RATE_KEY: &str = "speechSettings_rate";
pub const NATIVE_LANG_KEY: &str = "nativeLang";
pub const LEARNING_LANG_KEY: &str = "learningLang";

pub trait KeyValueStore {
    /// Missing or unreadable values are `None`.
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Reads and decodes a JSON value. Anything that does not parse is removed
/// and reported as absent.
pub fn load_json<T: DeserializeOwned>(store: &mut dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding unparsable stored value");
            if let Err(e) = store.remove(key) {
                tracing::warn!(key, error = %e, "failed to remove unparsable stored value");
            }
            None
        }
    }
}

pub fn save_json<T: Serialize>(
    store: &mut dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let encoded = serde_json::to_string(value).map_err(|source| StorageError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &encoded)
}

/// One file per key under a directory: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for DirectoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key).ok()?;
        match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read stored value");
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;
        // Write then rename so a crash never leaves a half-written value.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, value).map_err(|source| StorageError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| StorageError::Io { path, source })
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// In-memory store. Clones share the same map, so several components can
/// hold a handle to one store on the UI thread.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.values.borrow_mut().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_store_round_trips_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(dir.path().join("data"));
        assert_eq!(store.get(VOCABULARY_KEY), None);

        store.set(VOCABULARY_KEY, "[]").unwrap();
        assert_eq!(store.get(VOCABULARY_KEY).as_deref(), Some("[]"));
        assert!(dir.path().join("data").join("vocabWords.json").exists());

        store.remove(VOCABULARY_KEY).unwrap();
        assert_eq!(store.get(VOCABULARY_KEY), None);
        // Removing twice is fine.
        store.remove(VOCABULARY_KEY).unwrap();
    }

    #[test]
    fn rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(dir.path());
        assert!(matches!(
            store.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert_eq!(store.get("../escape"), None);
    }

    #[test]
    fn corrupt_json_is_discarded() {
        let mut store = MemoryStore::new();
        store.set(SESSION_KEY, "{not json").unwrap();
        let loaded: Option<Vec<u32>> = load_json(&mut store, SESSION_KEY);
        assert_eq!(loaded, None);
        assert_eq!(store.get(SESSION_KEY), None);
    }

    #[test]
    fn memory_store_clones_share_values() {
        let mut a = MemoryStore::new();
        let b = a.clone();
        save_json(&mut a, RATE_KEY, &1.5f32).unwrap();
        assert_eq!(b.get(RATE_KEY).as_deref(), Some("1.5"));
        assert_eq!(b.len(), 1);
    }
}
