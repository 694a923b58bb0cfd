use std::fmt;

/// Identity of an erased backend.
///
/// Minted once per [`ErasedBackend`](crate::ErasedBackend) and stamped on
/// every [`ChangeEvent`] delivered through it, so a holder of only the erased
/// handle can tell which backend an event came from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(uuid::Uuid);

impl BackendId {
    /// Generate a new time-ordered ID (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Short representation (first 8 characters of UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for BackendId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendId({})", self.short_id())
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value observed to have changed outside this process.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent<T> {
    /// The erased backend that observed the change.
    pub source: BackendId,
    /// The new value, or `None` if the record was deleted.
    pub value: Option<T>,
}
