//! Application lifecycle hooks.
//!
//! The host application owns the lifecycle and tells persistent objects
//! about transitions through a [`LifecycleSource`]. [`ManualLifecycle`] is
//! an in-process source driven by explicit calls.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

/// A lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The application is about to stop running in the foreground.
    Background,
    /// The application became active again.
    Foreground,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::Foreground => write!(f, "foreground"),
        }
    }
}

pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle for removing a lifecycle observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LifecycleToken(pub u64);

/// Source of lifecycle notifications.
pub trait LifecycleSource: Send + Sync {
    /// Call `callback` on every `event` until the token is removed.
    fn observe(&self, event: LifecycleEvent, callback: LifecycleCallback) -> LifecycleToken;

    /// Stop calling the observer. Returns `false` if it was already removed.
    fn remove(&self, token: LifecycleToken) -> bool;

    fn on_background(&self, callback: LifecycleCallback) -> LifecycleToken {
        self.observe(LifecycleEvent::Background, callback)
    }

    fn on_foreground(&self, callback: LifecycleCallback) -> LifecycleToken {
        self.observe(LifecycleEvent::Foreground, callback)
    }
}

struct Observer {
    token: LifecycleToken,
    event: LifecycleEvent,
    callback: LifecycleCallback,
}

/// Lifecycle source the host drives by hand.
pub struct ManualLifecycle {
    observers: RwLock<Vec<Observer>>,
    next_token: AtomicU64,
}

impl ManualLifecycle {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Notify background observers. Returns how many were called.
    pub fn enter_background(&self) -> usize {
        self.emit(LifecycleEvent::Background)
    }

    /// Notify foreground observers. Returns how many were called.
    pub fn enter_foreground(&self) -> usize {
        self.emit(LifecycleEvent::Foreground)
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn emit(&self, event: LifecycleEvent) -> usize {
        // Observers may remove themselves while running.
        let callbacks: Vec<LifecycleCallback> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|o| o.event == event)
            .map(|o| Arc::clone(&o.callback))
            .collect();

        debug!(%event, observers = callbacks.len(), "lifecycle transition");
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }
}

impl LifecycleSource for ManualLifecycle {
    fn observe(&self, event: LifecycleEvent, callback: LifecycleCallback) -> LifecycleToken {
        let token = LifecycleToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Observer {
                token,
                event,
                callback,
            });
        token
    }

    fn remove(&self, token: LifecycleToken) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|o| o.token != token);
        observers.len() != before
    }
}

impl Default for ManualLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualLifecycle")
            .field("observers", &self.observer_count())
            .finish()
    }
}
