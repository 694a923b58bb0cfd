//! Backend over an eventually-consistent cloud key-value store.
//!
//! This is the only backend whose record can change outside the process.
//! It subscribes to the store's remote-change notifications for its whole
//! lifetime and forwards changes to its own key through the notification
//! channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use pobj_codec::Codec;
use pobj_store::{CloudKeyValueStore, CloudNotification, CloudObserver, SubscriptionId};
use tracing::{debug, error, warn};

use crate::channel::NotificationChannel;
use crate::error::{BackendError, BackendResult};
use crate::traits::{decode_or_absent, Backend};

/// Longest key the cloud store accepts, in bytes.
pub const MAX_CLOUD_KEY_LEN: usize = 64;

/// State the notification observer needs; shared with the store's observer
/// list without giving it a handle back to the store.
struct Record<T, C> {
    key: String,
    codec: C,
    channel: NotificationChannel<T>,
}

impl<T, C> Record<T, C>
where
    C: Codec<T>,
{
    fn location(&self) -> String {
        format!("cloud:{}", self.key)
    }

    /// Local replica read. Never synchronizes.
    fn read(&self, store: &dyn CloudKeyValueStore) -> BackendResult<Option<T>> {
        Ok(store
            .data(&self.key)?
            .and_then(|data| decode_or_absent(&self.codec, &data, &self.location())))
    }

    fn on_notification(&self, store: &dyn CloudKeyValueStore, notification: &CloudNotification) {
        let Some(reason) = notification.change_reason() else {
            debug!(
                key = %self.key,
                raw = ?notification.reason,
                "ignoring notification without a known reason"
            );
            return;
        };
        if !reason.is_remote_data() {
            debug!(key = %self.key, %reason, "ignoring notification that carries no remote data");
            return;
        }
        if notification.changed_keys.is_none() {
            debug!(key = %self.key, "ignoring notification without changed keys");
            return;
        }
        if !notification.touches(&self.key) {
            return;
        }

        // The synchronize that produced this notification is still running;
        // synchronizing again here would loop.
        let value = match self.read(store) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.key, error = %e, "could not re-read externally changed record");
                return;
            }
        };

        debug!(key = %self.key, %reason, present = value.is_some(), "external change observed");
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| self.channel.deliver(value)));
        match delivered {
            Ok(true) => {}
            Ok(false) => debug!(key = %self.key, "no handler registered for external change"),
            Err(_) => error!(key = %self.key, "external change handler panicked"),
        }
    }
}

/// Registration with the store's notification source, released on drop.
struct Subscription {
    store: Arc<dyn CloudKeyValueStore>,
    id: SubscriptionId,
}

impl Subscription {
    fn new(store: Arc<dyn CloudKeyValueStore>, observer: CloudObserver) -> Self {
        let id = store.subscribe(observer);
        Self { store, id }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.store.unsubscribe(self.id) {
            warn!(id = %self.id, "cloud subscription was already gone");
        }
    }
}

/// Persists the value under one key of a cloud key-value store.
pub struct CloudKeyValueBackend<T, C> {
    record: Arc<Record<T, C>>,
    subscription: Subscription,
}

impl<T, C> CloudKeyValueBackend<T, C>
where
    T: 'static,
    C: Codec<T> + 'static,
{
    /// Address `key` in `store` and start observing remote changes.
    ///
    /// Keys must be non-empty and at most [`MAX_CLOUD_KEY_LEN`] bytes.
    pub fn new(
        store: Arc<dyn CloudKeyValueStore>,
        key: impl Into<String>,
        codec: C,
    ) -> BackendResult<Self> {
        let key = key.into();
        validate_key(&key)?;

        let record = Arc::new(Record {
            key,
            codec,
            channel: NotificationChannel::new(),
        });
        let observed = Arc::clone(&record);
        let observer: CloudObserver = Arc::new(
            move |store: &dyn CloudKeyValueStore, notification: &CloudNotification| {
                observed.on_notification(store, notification)
            },
        );
        let subscription = Subscription::new(store, observer);
        debug!(key = %record.key, id = %subscription.id, "cloud backend observing remote changes");

        Ok(Self {
            record,
            subscription,
        })
    }
}

impl<T, C> CloudKeyValueBackend<T, C> {
    fn store(&self) -> &dyn CloudKeyValueStore {
        self.subscription.store.as_ref()
    }
}

fn validate_key(key: &str) -> BackendResult<()> {
    let reason = if key.is_empty() {
        "key must not be empty".to_string()
    } else if key.len() > MAX_CLOUD_KEY_LEN {
        format!("key is {} bytes; the limit is {MAX_CLOUD_KEY_LEN}", key.len())
    } else {
        return Ok(());
    };
    Err(BackendError::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

impl<T, C> Backend for CloudKeyValueBackend<T, C>
where
    C: Codec<T>,
{
    type Value = T;

    fn archive(&self, value: Option<&T>) -> BackendResult<()> {
        let key = &self.record.key;
        match value {
            Some(value) => {
                let payload = self.record.codec.encode(value)?;
                self.store().set_data(key, &payload)?;
                debug!(%key, len = payload.len(), "record archived to local replica");
            }
            None => {
                self.store().remove(key)?;
                debug!(%key, "record removed from local replica");
            }
        }
        Ok(())
    }

    /// Read the local replica, then synchronize so that a newer remote value
    /// arrives through the notification channel as soon as possible.
    fn unarchive(&self) -> Option<T> {
        let value = match self.record.read(self.store()) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.record.key, error = %e, "record could not be read");
                None
            }
        };
        if let Err(e) = self.store().synchronize() {
            warn!(key = %self.record.key, error = %e, "initial synchronize failed");
        }
        value
    }

    fn synchronize(&self) -> BackendResult<()> {
        self.store().synchronize()?;
        Ok(())
    }

    fn channel(&self) -> &NotificationChannel<T> {
        &self.record.channel
    }

    fn location(&self) -> String {
        self.record.location()
    }
}
