//! In-process cloud key-value store.
//!
//! A [`CloudAuthority`] plays the remote server; each [`CloudReplica`] plays
//! one device's local copy. Replicas only see each other's writes after a
//! [`CloudKeyValueStore::synchronize`], which pushes pending local writes,
//! pulls everything else, and notifies subscribers about keys that changed.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::cloud::{ChangeReason, CloudNotification, SubscriptionId};
use crate::error::{StoreError, StoreResult};
use crate::traits::{CloudKeyValueStore, CloudObserver};

/// The remote side of the simulated cloud store.
#[derive(Debug, Default)]
pub struct CloudAuthority {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl CloudAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a new device replica that starts empty and unsynchronized.
    pub fn replica(self: &Arc<Self>) -> CloudReplica {
        CloudReplica {
            authority: Arc::clone(self),
            state: Mutex::new(ReplicaState::default()),
            observers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            online: AtomicBool::new(true),
        }
    }

    /// Authoritative bytes for `key`.
    pub fn record(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    /// Write directly to the server, as a device outside this process would.
    pub fn set_record(&self, key: &str, value: Option<&[u8]>) {
        let mut records = self.lock();
        match value {
            Some(bytes) => {
                records.insert(key.to_string(), bytes.to_vec());
            }
            None => {
                records.remove(key);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct ReplicaState {
    local: HashMap<String, Vec<u8>>,
    /// Keys written locally and not yet pushed.
    pending: BTreeSet<String>,
    initial_sync_done: bool,
}

/// One device's replica of the simulated cloud store.
pub struct CloudReplica {
    authority: Arc<CloudAuthority>,
    state: Mutex<ReplicaState>,
    observers: RwLock<Vec<(SubscriptionId, CloudObserver)>>,
    next_subscription: AtomicU64,
    online: AtomicBool,
}

impl CloudReplica {
    /// Simulate losing or regaining connectivity to the authority.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of active observers.
    pub fn subscriber_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Keys written locally that have not been pushed yet.
    pub fn pending_keys(&self) -> Vec<String> {
        self.lock().pending.iter().cloned().collect()
    }

    /// Deliver `notification` to every observer, as the platform would.
    ///
    /// Observers run on the calling thread with no replica locks held.
    pub fn post(&self, notification: &CloudNotification) {
        let observers: Vec<CloudObserver> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        debug!(
            reason = ?notification.reason,
            keys = ?notification.changed_keys,
            observers = observers.len(),
            "posting cloud notification"
        );
        for observer in observers {
            observer(self, notification);
        }
    }

    /// Apply a change that arrived from the server for one key and notify
    /// observers with `reason`.
    ///
    /// Data-carrying reasons update both the authority and the local replica.
    /// Other reasons only post the notification.
    pub fn simulate_remote_change(&self, reason: ChangeReason, key: &str, value: Option<&[u8]>) {
        if reason.is_remote_data() {
            self.authority.set_record(key, value);
            let mut state = self.lock();
            state.pending.remove(key);
            match value {
                Some(bytes) => {
                    state.local.insert(key.to_string(), bytes.to_vec());
                }
                None => {
                    state.local.remove(key);
                }
            }
        }
        self.post(&CloudNotification::new(reason, [key]));
    }

    fn lock(&self) -> MutexGuard<'_, ReplicaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push pending writes, pull remote ones, and return the notification to
    /// post (if any key changed locally).
    fn reconcile(&self) -> Option<CloudNotification> {
        let mut state = self.lock();
        let mut records = self.authority.lock();

        let pending = std::mem::take(&mut state.pending);
        for key in &pending {
            match state.local.get(key) {
                Some(bytes) => {
                    records.insert(key.clone(), bytes.clone());
                }
                None => {
                    records.remove(key);
                }
            }
        }

        let keys: BTreeSet<String> = records
            .keys()
            .chain(state.local.keys())
            .cloned()
            .collect();
        let mut changed = Vec::new();
        for key in keys {
            let remote = records.get(&key);
            if remote == state.local.get(&key) {
                continue;
            }
            match remote {
                Some(bytes) => {
                    state.local.insert(key.clone(), bytes.clone());
                }
                None => {
                    state.local.remove(&key);
                }
            }
            changed.push(key);
        }

        let reason = if state.initial_sync_done {
            ChangeReason::ServerChange
        } else {
            ChangeReason::InitialSyncChange
        };
        state.initial_sync_done = true;

        debug!(pushed = pending.len(), pulled = changed.len(), %reason, "replica reconciled");
        if changed.is_empty() {
            None
        } else {
            Some(CloudNotification::new(reason, changed))
        }
    }
}

impl CloudKeyValueStore for CloudReplica {
    fn data(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lock().local.get(key).cloned())
    }

    fn set_data(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut state = self.lock();
        state.local.insert(key.to_string(), value.to_vec());
        state.pending.insert(key.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.local.remove(key);
        state.pending.insert(key.to_string());
        Ok(())
    }

    fn synchronize(&self) -> StoreResult<()> {
        if !self.online.load(Ordering::SeqCst) {
            warn!("cloud store offline; synchronize skipped");
            return Err(StoreError::Unavailable("replica is offline".into()));
        }
        if let Some(notification) = self.reconcile() {
            self.post(&notification);
        }
        Ok(())
    }

    fn subscribe(&self, observer: CloudObserver) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        info!(%id, "cloud observer subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(sub, _)| *sub != id);
        let removed = observers.len() != before;
        if removed {
            info!(%id, "cloud observer unsubscribed");
        }
        removed
    }
}

impl std::fmt::Debug for CloudReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudReplica")
            .field("subscribers", &self.subscriber_count())
            .field("online", &self.online.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
