use std::fmt;
use std::sync::Arc;

use pobj_codec::Codec;

use crate::channel::NotificationChannel;
use crate::cloud::CloudKeyValueBackend;
use crate::error::BackendResult;
use crate::event::{BackendId, ChangeEvent};
use crate::file::FileBackend;
use crate::key_value::KeyValueBackend;
use crate::traits::Backend;

/// Any backend for values of type `T`, behind one concrete type.
///
/// Forwards every operation to the wrapped backend unchanged, so records
/// written through the wrapper are indistinguishable from records written
/// by the backend directly. Each wrapper carries a fresh [`BackendId`] that
/// it stamps onto the [`ChangeEvent`]s it produces.
pub struct ErasedBackend<T> {
    id: BackendId,
    inner: Box<dyn Backend<Value = T>>,
}

impl<T: 'static> ErasedBackend<T> {
    pub fn new<B>(backend: B) -> Self
    where
        B: Backend<Value = T> + 'static,
    {
        Self {
            id: BackendId::new(),
            inner: Box::new(backend),
        }
    }

    /// Route external changes of the wrapped backend to `handler` as
    /// [`ChangeEvent`]s. Replaces any previous handler.
    pub fn on_external_change<F>(&self, handler: F)
    where
        F: Fn(ChangeEvent<T>) + Send + Sync + 'static,
    {
        let source = self.id;
        self.inner
            .channel()
            .register(Arc::new(move |value: Option<T>| handler(ChangeEvent { source, value })));
    }
}

impl<T> ErasedBackend<T> {
    pub fn id(&self) -> BackendId {
        self.id
    }

    /// Stop routing external changes. Returns `true` if a handler was attached.
    pub fn clear_external_change(&self) -> bool {
        self.inner.channel().clear()
    }
}

impl<T> Backend for ErasedBackend<T> {
    type Value = T;

    fn archive(&self, value: Option<&T>) -> BackendResult<()> {
        self.inner.archive(value)
    }

    fn unarchive(&self) -> Option<T> {
        self.inner.unarchive()
    }

    fn synchronize(&self) -> BackendResult<()> {
        self.inner.synchronize()
    }

    fn channel(&self) -> &NotificationChannel<T> {
        self.inner.channel()
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}

macro_rules! erase_from {
    ($($backend:ident),+) => {$(
        impl<T, C> From<$backend<T, C>> for ErasedBackend<T>
        where
            T: 'static,
            C: Codec<T> + 'static,
        {
            fn from(backend: $backend<T, C>) -> Self {
                Self::new(backend)
            }
        }
    )+};
}

erase_from!(FileBackend, KeyValueBackend, CloudKeyValueBackend);

impl<T> fmt::Debug for ErasedBackend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedBackend")
            .field("id", &self.id)
            .field("location", &self.inner.location())
            .finish()
    }
}
