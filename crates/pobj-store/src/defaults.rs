//! File-backed defaults database.
//!
//! Keys and values are held in memory and written out as one bincode map
//! wrapped in a checksummed envelope. Writes are buffered until
//! [`KeyValueStore::synchronize`] (or drop) flushes them, mirroring how
//! platform user-defaults databases behave.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use pobj_codec::envelope;
use tracing::{debug, info, warn};

use crate::atomic::{read_if_exists, write_atomic};
use crate::error::{StoreError, StoreResult};
use crate::traits::KeyValueStore;

struct DefaultsState {
    entries: BTreeMap<String, Vec<u8>>,
    dirty: bool,
}

/// A local key-value database persisted to a single file.
pub struct DefaultsDatabase {
    path: PathBuf,
    state: Mutex<DefaultsState>,
}

impl DefaultsDatabase {
    /// Open the database at `path`, loading any existing contents.
    ///
    /// A missing file yields an empty database. A file that exists but fails
    /// its envelope or decode checks is reported as [`StoreError::Corrupt`].
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match read_if_exists(&path)? {
            Some(data) => Self::decode(&path, &data)?,
            None => BTreeMap::new(),
        };

        info!(path = %path.display(), keys = entries.len(), "defaults database opened");

        Ok(Self {
            path,
            state: Mutex::new(DefaultsState {
                entries,
                dirty: false,
            }),
        })
    }

    /// Open the database, discarding a corrupt file instead of failing.
    pub fn open_or_reset(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        match Self::open(path) {
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!(path = %path.display(), %reason, "discarding corrupt defaults database");
                Ok(Self {
                    path: path.to_path_buf(),
                    state: Mutex::new(DefaultsState {
                        entries: BTreeMap::new(),
                        dirty: true,
                    }),
                })
            }
            other => other,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether there are writes not yet flushed to disk.
    pub fn has_unsynchronized_changes(&self) -> bool {
        self.lock().dirty
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DefaultsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode(path: &Path, data: &[u8]) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let corrupt = |reason: String| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };
        let payload = envelope::open(data).map_err(|e| corrupt(e.to_string()))?;
        bincode::deserialize(payload).map_err(|e| corrupt(e.to_string()))
    }

    fn flush(&self, state: &mut DefaultsState) -> StoreResult<()> {
        if !state.dirty {
            return Ok(());
        }
        persist(&self.path, &state.entries)?;
        state.dirty = false;
        debug!(
            path = %self.path.display(),
            keys = state.entries.len(),
            "defaults database flushed"
        );
        Ok(())
    }
}

fn persist(path: &Path, entries: &BTreeMap<String, Vec<u8>>) -> StoreResult<()> {
    let payload =
        bincode::serialize(entries).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let sealed = envelope::seal(&payload).map_err(|e| StoreError::Serialization(e.to_string()))?;
    write_atomic(path, &sealed)?;
    Ok(())
}

impl KeyValueStore for DefaultsDatabase {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lock().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut state = self.lock();
        state.entries.insert(key.to_string(), value.to_vec());
        state.dirty = true;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        let mut state = self.lock();
        let existed = state.entries.remove(key).is_some();
        state.dirty |= existed;
        Ok(existed)
    }

    fn synchronize(&self) -> StoreResult<()> {
        let mut state = self.lock();
        self.flush(&mut state)
    }
}

impl Drop for DefaultsDatabase {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.dirty {
            return;
        }
        if let Err(e) = persist(&self.path, &state.entries) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "failed to flush defaults database on drop"
            );
        }
    }
}

impl std::fmt::Debug for DefaultsDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultsDatabase")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
