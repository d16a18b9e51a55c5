//! File-per-key storage backend for native builds.
//!
//! Each key lives in its own file under one directory. Writes go to a
//! temporary file that is then renamed over the target, so a reader in
//! another process never sees a half-written value.
//!
//! Other processes sharing the directory are noticed by `poll()`, which
//! compares modification times against the last ones seen.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use omni_core::event_bus::{EventBus, Subscription};
use omni_core::ports::StoragePort;
use omni_types::{OmniError, Result, event::StorageChange};

const VALUE_EXT: &str = "dat";
const TEMP_EXT: &str = "dat.tmp";
const APP_DIR: &str = "omni-chat";

pub struct FileStorage {
    dir: PathBuf,
    changes: EventBus<StorageChange>,
    seen: RefCell<HashMap<String, SystemTime>>,
}

impl FileStorage {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let storage = Self {
            dir,
            changes: EventBus::new(),
            seen: RefCell::new(HashMap::new()),
        };
        *storage.seen.borrow_mut() = storage.snapshot()?;
        Ok(storage)
    }

    /// `<data dir>/omni-chat`, e.g. `~/.local/share/omni-chat` on Linux.
    pub fn open_default() -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| OmniError::Storage("Could not determine data directory".to_string()))?
            .join(APP_DIR);
        Self::open(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Emit a change for every key written or removed by someone else since
    /// the last poll. Returns the number of changes emitted.
    pub fn poll(&self) -> Result<usize> {
        let current = self.snapshot()?;
        let mut changed: Vec<String> = Vec::new();
        {
            let seen = self.seen.borrow();
            for (key, modified) in &current {
                if seen.get(key) != Some(modified) {
                    changed.push(key.clone());
                }
            }
            changed.extend(seen.keys().filter(|k| !current.contains_key(*k)).cloned());
        }
        *self.seen.borrow_mut() = current;

        for key in &changed {
            log::debug!("External change to '{}'", key);
            self.changes.emit(StorageChange::new(key.as_str()));
        }
        Ok(changed.len())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), VALUE_EXT))
    }

    fn snapshot(&self) -> Result<HashMap<String, SystemTime>> {
        let mut out = HashMap::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.dir, e))?;
            let Some(key) = key_from_path(&entry.path()) else {
                continue;
            };
            // Vanished between read_dir and metadata: treat as absent.
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                out.insert(key, modified);
            }
        }
        Ok(out)
    }

    fn remember(&self, key: &str) {
        let modified = std::fs::metadata(self.path_for(key)).and_then(|m| m.modified());
        let mut seen = self.seen.borrow_mut();
        match modified {
            Ok(modified) => {
                seen.insert(key.to_string(), modified);
            }
            Err(_) => {
                seen.remove(key);
            }
        }
    }
}

#[async_trait(?Send)]
impl StoragePort for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let temp_path = path.with_extension(TEMP_EXT);
        std::fs::write(&temp_path, value).map_err(|e| io_error(&temp_path, e))?;
        std::fs::rename(&temp_path, &path).map_err(|e| io_error(&path, e))?;
        self.remember(key);
        self.changes.emit(StorageChange::new(key));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                self.remember(key);
                self.changes.emit(StorageChange::new(key));
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .snapshot()?
            .into_keys()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    fn subscribe_changes(&self) -> Subscription<StorageChange> {
        self.changes.subscribe()
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}

fn io_error(path: &Path, e: std::io::Error) -> OmniError {
    OmniError::Storage(format!("{}: {}", path.display(), e))
}

/// Keys may hold characters that are not valid in file names (`:` on
/// Windows); anything outside `[A-Za-z0-9_-]` is percent-encoded.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

pub(crate) fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// `None` for names this store would not have written.
pub(crate) fn decode_key(name: &str) -> Option<String> {
    let key = percent_decode_str(name).decode_utf8().ok()?.into_owned();
    (encode_key(&key) == name).then_some(key)
}

fn key_from_path(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != VALUE_EXT {
        return None;
    }
    decode_key(path.file_stem()?.to_str()?)
}
