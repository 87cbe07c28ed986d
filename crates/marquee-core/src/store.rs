// ── Durable session storage ──
//
// Key-value persistence for credentials and the logout sentinel.
// The file store keeps one JSON object per agent install and replaces
// it atomically on every mutation, so a crash mid-write never leaves a
// half-updated credential set on disk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::CoreError;

// ── Well-known keys ──────────────────────────────────────────────────

pub const KEY_USERNAME: &str = "credentials.username";
pub const KEY_PASSWORD: &str = "credentials.password";
pub const KEY_SCREEN_NAME: &str = "credentials.screen_name";
/// Transient sentinel suppressing session auto-restore on the next
/// start, closing the race between credential-clear and process restart.
pub const KEY_JUST_LOGGED_OUT: &str = "session.just_logged_out";

/// The three credential keys, cleared together.
pub const CREDENTIAL_KEYS: [&str; 3] = [KEY_USERNAME, KEY_PASSWORD, KEY_SCREEN_NAME];

// ── SessionStore ─────────────────────────────────────────────────────

/// Durable key-value persistence for session state.
///
/// Implementations must make each single-key operation atomic; the
/// session manager layers its multi-key protocols (all-or-nothing
/// credential load, sentinel-before-restore ordering) on top.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

// ── FileStore ────────────────────────────────────────────────────────

/// JSON-file-backed store under the agent's data directory.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or create) the store file at `{data_dir}/session.json`.
    pub fn open(data_dir: &Path) -> Result<Self, CoreError> {
        fs::create_dir_all(data_dir).map_err(|e| CoreError::Storage {
            message: format!("cannot create data dir {}: {e}", data_dir.display()),
        })?;

        let path = data_dir.join("session.json");
        let cache = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| CoreError::Storage {
                message: format!("corrupt session store {}: {e}", path.display()),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(CoreError::Storage {
                    message: format!("cannot read session store {}: {e}", path.display()),
                });
            }
        };

        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    /// Write the full map to a temp file, then rename over the store.
    fn persist(&self, map: &HashMap<String, String>) -> Result<(), CoreError> {
        let raw = serde_json::to_string_pretty(map).map_err(|e| CoreError::Storage {
            message: format!("cannot serialize session store: {e}"),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw).map_err(|e| CoreError::Storage {
            message: format!("cannot write {}: {e}", tmp.display()),
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| CoreError::Storage {
            message: format!("cannot replace {}: {e}", self.path.display()),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, CoreError> {
        self.cache.lock().map_err(|_| CoreError::Storage {
            message: "session store lock poisoned".into(),
        })
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut map = self.lock()?;
        map.insert(key.to_owned(), value.to_owned());
        self.persist(&map)
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        let mut map = self.lock()?;
        if map.remove(key).is_some() {
            self.persist(&map)?;
        }
        Ok(())
    }
}

// ── MemoryStore ──────────────────────────────────────────────────────

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .map
            .lock()
            .map_err(|_| CoreError::Storage {
                message: "memory store lock poisoned".into(),
            })?
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.map
            .lock()
            .map_err(|_| CoreError::Storage {
                message: "memory store lock poisoned".into(),
            })?
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.map
            .lock()
            .map_err(|_| CoreError::Storage {
                message: "memory store lock poisoned".into(),
            })?
            .remove(key);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).expect("open");

        store.set(KEY_USERNAME, "lobby").expect("set");
        assert_eq!(store.get(KEY_USERNAME).expect("get").as_deref(), Some("lobby"));

        store.remove(KEY_USERNAME).expect("remove");
        assert_eq!(store.get(KEY_USERNAME).expect("get"), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = FileStore::open(dir.path()).expect("open");
            store.set(KEY_SCREEN_NAME, "Lobby Display").expect("set");
        }

        let store = FileStore::open(dir.path()).expect("reopen");
        assert_eq!(
            store.get(KEY_SCREEN_NAME).expect("get").as_deref(),
            Some("Lobby Display")
        );
    }

    #[test]
    fn file_store_remove_missing_key_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).expect("open");
        store.remove("no.such.key").expect("remove");
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        store.set(KEY_JUST_LOGGED_OUT, "true").expect("set");
        assert_eq!(
            store.get(KEY_JUST_LOGGED_OUT).expect("get").as_deref(),
            Some("true")
        );
        store.remove(KEY_JUST_LOGGED_OUT).expect("remove");
        assert_eq!(store.get(KEY_JUST_LOGGED_OUT).expect("get"), None);
    }
}
