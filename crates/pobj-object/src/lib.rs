//! Persistent objects.
//!
//! A [`PersistentObject`] caches one value in memory and keeps it durable
//! through an [`ErasedBackend`](pobj_backend::ErasedBackend). It provides:
//! - Explicit `reset` / `save` / `synchronize`, with no write-through
//! - Last-writer-wins application of changes made outside the process,
//!   reported to an optional [`ObjectDelegate`]
//! - Save on drop, plus save/synchronize hooks driven by a [`LifecycleSource`]
//! - [`ObjectConfig`] loaded from TOML

pub mod config;
pub mod delegate;
pub mod error;
pub mod lifecycle;
pub mod object;

pub use config::ObjectConfig;
pub use delegate::ObjectDelegate;
pub use error::{ConfigError, ConfigResult};
pub use lifecycle::{
    LifecycleCallback, LifecycleEvent, LifecycleSource, LifecycleToken, ManualLifecycle,
};
pub use object::{PersistentObject, PersistentObjectBuilder};
