//! Storage media for persistent objects.
//!
//! A medium is a key-addressed byte store. It never interprets what it
//! holds; codecs and backends above it decide what the bytes mean.
//!
//! # Local media
//!
//! All implement [`KeyValueStore`]:
//!
//! - [`InMemoryKeyValueStore`]: `HashMap`-based store for tests and embedding
//! - [`DefaultsDatabase`]: single-file database, flushed on `synchronize`
//!
//! The [`atomic`] helpers give whole-file replacement for file-per-record
//! storage.
//!
//! # Cloud media
//!
//! [`CloudKeyValueStore`] adds a synchronize round trip and remote-change
//! notifications. [`CloudAuthority`] and [`CloudReplica`] simulate one in
//! process.
//!
//! Storage handles are always passed in explicitly; there is no process-wide
//! default store.

pub mod atomic;
pub mod cloud;
pub mod defaults;
pub mod error;
pub mod memory;
pub mod simulator;
pub mod traits;

pub use cloud::{ChangeReason, CloudNotification, SubscriptionId};
pub use defaults::DefaultsDatabase;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryKeyValueStore;
pub use simulator::{CloudAuthority, CloudReplica};
pub use traits::{CloudKeyValueStore, CloudObserver, KeyValueStore};
