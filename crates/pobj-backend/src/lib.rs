//! Backends: where a persistent object's single record lives.
//!
//! A [`Backend`] owns exactly one record on one medium and knows how to
//! archive a value into it, read it back, and flush it. Three concrete
//! backends are provided:
//!
//! | Backend | Medium | External changes |
//! |---------|--------|------------------|
//! | [`FileBackend`] | one file, checksummed envelope, atomic rename | never |
//! | [`KeyValueBackend`] | one key of a [`KeyValueStore`](pobj_store::KeyValueStore) | never |
//! | [`CloudKeyValueBackend`] | one key of a cloud key-value store | remote updates |
//!
//! External changes are announced through each backend's
//! [`NotificationChannel`]. [`ErasedBackend`] hides the concrete backend and
//! turns those announcements into [`ChangeEvent`]s tagged with a
//! [`BackendId`].

pub mod channel;
pub mod cloud;
pub mod erased;
pub mod error;
pub mod event;
pub mod file;
pub mod key_value;
pub mod traits;

pub use channel::{ChangeHandler, NotificationChannel};
pub use cloud::{CloudKeyValueBackend, MAX_CLOUD_KEY_LEN};
pub use erased::ErasedBackend;
pub use error::{BackendError, BackendResult};
pub use event::{BackendId, ChangeEvent};
pub use file::FileBackend;
pub use key_value::KeyValueBackend;
pub use traits::Backend;
