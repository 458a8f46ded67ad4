use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const EXPIRES_AT_KEY: &str = "expiresAt";
pub const PLAYLIST_ID_KEY: &str = "playlistId";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed store file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Flat string key-value store kept in a single JSON object on disk.
///
/// Every mutation rewrites the whole file, which is fine for the handful
/// of keys this service keeps (tokens and the selected playlist).
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
}

impl JsonStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let data = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Store file {:?} not found, starting empty", path);
                Map::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(JsonStore {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.get(key).and_then(|v| v.as_str()).map(str::to_owned)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.insert(key.to_owned(), Value::String(value.to_owned()));
        self.flush(&data)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if data.remove(key).is_some() {
            self.flush(&data)?;
        }
        Ok(())
    }

    fn flush(&self, data: &Map<String, Value>) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(data).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&self.path, text).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let store = JsonStore::open(&path).unwrap();
        assert_eq!(store.get(PLAYLIST_ID_KEY), None);
        store.set(PLAYLIST_ID_KEY, "37i9dQZF1DX").unwrap();
        store.set(ACCESS_TOKEN_KEY, "token").unwrap();
        drop(store);

        let reopened = JsonStore::open(&path).unwrap();
        assert_eq!(reopened.get(PLAYLIST_ID_KEY).as_deref(), Some("37i9dQZF1DX"));
        assert_eq!(reopened.get(ACCESS_TOKEN_KEY).as_deref(), Some("token"));
    }

    #[test]
    fn remove_clears_key_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        let store = JsonStore::open(&path).unwrap();
        store.set(REFRESH_TOKEN_KEY, "r").unwrap();
        store.remove(REFRESH_TOKEN_KEY).unwrap();
        store.remove("never-set").unwrap();

        let reopened = JsonStore::open(&path).unwrap();
        assert_eq!(reopened.get(REFRESH_TOKEN_KEY), None);
    }

    #[test]
    fn poisoned_lock_still_serves_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonStore::open(dir.path().join("data.json")).unwrap());
        store.set(PLAYLIST_ID_KEY, "pl").unwrap();

        let holder = store.clone();
        let panicked = std::thread::spawn(move || {
            let _guard = holder.data.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(panicked.is_err());
        assert!(store.data.is_poisoned());

        assert_eq!(store.get(PLAYLIST_ID_KEY).as_deref(), Some("pl"));
        store.set(ACCESS_TOKEN_KEY, "token").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("token"));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(JsonStore::open(&path), Err(StoreError::Json { .. })));
    }
}
