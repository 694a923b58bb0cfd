use std::sync::Arc;

use crate::cloud::{CloudNotification, SubscriptionId};
use crate::error::StoreResult;

/// Key-addressed byte store on the local machine.
///
/// Implementations must satisfy these invariants:
/// - `set` and `remove` are atomic with respect to a concurrent `get`; a
///   reader sees either the old bytes or the new bytes, never a mix.
/// - The store never interprets the bytes it holds.
/// - Writes may be buffered; `synchronize` makes them durable.
pub trait KeyValueStore: Send + Sync {
    /// Read the bytes stored under `key`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any prior bytes.
    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Returns `true` if a value was present.
    fn remove(&self, key: &str) -> StoreResult<bool>;

    /// Flush buffered writes to durable storage.
    fn synchronize(&self) -> StoreResult<()>;

    /// Check whether a value is stored under `key`.
    fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Callback invoked when the remote authority changes keys in a cloud store.
///
/// The store passes itself so observers can re-read without holding a
/// reference back to it.
pub type CloudObserver = Arc<dyn Fn(&dyn CloudKeyValueStore, &CloudNotification) + Send + Sync>;

/// Eventually-consistent key-value store mirrored from a remote authority.
///
/// Reads and writes hit a local replica. [`synchronize`] pushes local writes
/// and pulls remote ones; keys changed by the pull are announced to every
/// subscriber, possibly before `synchronize` returns.
///
/// [`synchronize`]: CloudKeyValueStore::synchronize
pub trait CloudKeyValueStore: Send + Sync {
    /// Read the locally replicated bytes for `key`.
    fn data(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write bytes for `key` into the local replica.
    fn set_data(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key` from the local replica.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Reconcile the local replica with the remote authority.
    fn synchronize(&self) -> StoreResult<()>;

    /// Register for remote-change notifications.
    fn subscribe(&self, observer: CloudObserver) -> SubscriptionId;

    /// Remove a registration. Returns `true` if it was still active.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}
