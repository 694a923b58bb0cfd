use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Callback receiving a value that changed outside the process.
pub type ChangeHandler<T> = Arc<dyn Fn(Option<T>) + Send + Sync>;

/// Single-slot registration point for external-change callbacks.
///
/// At most one handler is attached at a time; registering replaces the
/// previous one. Delivery clones the handler out of the slot and calls it
/// with the slot unlocked, so a handler may re-register or clear without
/// deadlocking, and concurrent deliveries never block each other.
pub struct NotificationChannel<T> {
    slot: RwLock<Option<ChangeHandler<T>>>,
}

impl<T> NotificationChannel<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Attach `handler`. Returns `true` if it replaced an existing one.
    pub fn register(&self, handler: ChangeHandler<T>) -> bool {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handler)
            .is_some()
    }

    /// Detach the current handler. Returns `true` if one was attached.
    pub fn clear(&self) -> bool {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Hand `value` to the attached handler.
    ///
    /// Returns `false` if nothing was attached and the value was dropped.
    pub fn deliver(&self, value: Option<T>) -> bool {
        let handler = self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => {
                handler(value);
                true
            }
            None => false,
        }
    }
}

impl<T> Default for NotificationChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for NotificationChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("registered", &self.is_registered())
            .finish()
    }
}
