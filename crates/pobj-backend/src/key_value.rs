use std::sync::Arc;

use pobj_codec::Codec;
use pobj_store::KeyValueStore;
use tracing::{debug, warn};

use crate::channel::NotificationChannel;
use crate::error::{BackendError, BackendResult};
use crate::traits::{decode_or_absent, Backend};

/// Persists the value under one key of a local key-value database.
pub struct KeyValueBackend<T, C> {
    store: Arc<dyn KeyValueStore>,
    key: String,
    codec: C,
    channel: NotificationChannel<T>,
}

impl<T, C> KeyValueBackend<T, C>
where
    C: Codec<T>,
{
    /// Address `key` in `store`. Empty keys are rejected.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        codec: C,
    ) -> BackendResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(BackendError::InvalidKey {
                key,
                reason: "key must not be empty".into(),
            });
        }
        Ok(Self {
            store,
            key,
            codec,
            channel: NotificationChannel::new(),
        })
    }
}

impl<T, C> Backend for KeyValueBackend<T, C>
where
    C: Codec<T>,
{
    type Value = T;

    fn archive(&self, value: Option<&T>) -> BackendResult<()> {
        match value {
            Some(value) => {
                let payload = self.codec.encode(value)?;
                self.store.set(&self.key, &payload)?;
                debug!(key = %self.key, len = payload.len(), "record archived");
            }
            None => {
                let removed = self.store.remove(&self.key)?;
                debug!(key = %self.key, removed, "record deleted");
            }
        }
        Ok(())
    }

    fn unarchive(&self) -> Option<T> {
        match self.store.get(&self.key) {
            Ok(Some(data)) => decode_or_absent(&self.codec, &data, &self.location()),
            Ok(None) => None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "record could not be read");
                None
            }
        }
    }

    fn synchronize(&self) -> BackendResult<()> {
        self.store.synchronize()?;
        Ok(())
    }

    fn channel(&self) -> &NotificationChannel<T> {
        &self.channel
    }

    fn location(&self) -> String {
        format!("kv:{}", self.key)
    }
}
