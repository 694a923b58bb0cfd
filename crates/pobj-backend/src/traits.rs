use pobj_codec::Codec;
use tracing::warn;

use crate::channel::NotificationChannel;
use crate::error::BackendResult;

/// A storage strategy for exactly one persisted record.
///
/// All implementations must satisfy these invariants:
/// - A backend addresses the same record for its whole lifetime.
/// - `archive` replaces the record atomically; a concurrent reader of the
///   same medium sees the old record or the new one, never a partial write.
/// - `unarchive` never fails loudly. A missing, unreadable, or undecodable
///   record is `None`, logged where it happens.
/// - Only backends whose medium can change outside the process fire their
///   [`NotificationChannel`]. Local backends leave it silent.
pub trait Backend: Send + Sync {
    /// The domain value stored in the record.
    type Value;

    /// Write `value` to the record, or delete the record if `None`.
    fn archive(&self, value: Option<&Self::Value>) -> BackendResult<()>;

    /// Read the record.
    fn unarchive(&self) -> Option<Self::Value>;

    /// Flush pending writes to the authoritative medium.
    ///
    /// Cloud backends also reconcile with the remote side here, which may
    /// fire the notification channel before this returns.
    fn synchronize(&self) -> BackendResult<()>;

    /// Where external changes to the record are announced.
    fn channel(&self) -> &NotificationChannel<Self::Value>;

    /// Human-readable address of the record, for logs.
    fn location(&self) -> String;
}

/// Decode `data`, degrading any failure to `None`.
pub(crate) fn decode_or_absent<T, C>(codec: &C, data: &[u8], location: &str) -> Option<T>
where
    C: Codec<T> + ?Sized,
{
    match codec.decode(data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%location, error = %e, "stored record could not be decoded; treating as absent");
            None
        }
    }
}
