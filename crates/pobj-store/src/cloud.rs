//! Remote-change notification types for cloud key-value stores.

use std::fmt;

/// Why the remote authority changed keys in the local replica.
///
/// Codes match the platform's numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeReason {
    /// Another device changed the value on the server.
    ServerChange,
    /// The first download from the server after launch finished.
    InitialSyncChange,
    /// The app exceeded its storage quota and the store evicted keys.
    QuotaViolationChange,
    /// The signed-in account changed.
    AccountChange,
}

impl ChangeReason {
    /// Decode a raw reason code. Unknown codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::ServerChange),
            1 => Some(Self::InitialSyncChange),
            2 => Some(Self::QuotaViolationChange),
            3 => Some(Self::AccountChange),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::ServerChange => 0,
            Self::InitialSyncChange => 1,
            Self::QuotaViolationChange => 2,
            Self::AccountChange => 3,
        }
    }

    /// Whether the change carries authoritative remote data worth adopting.
    pub fn is_remote_data(self) -> bool {
        matches!(self, Self::ServerChange | Self::InitialSyncChange)
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ServerChange => "server-change",
            Self::InitialSyncChange => "initial-sync",
            Self::QuotaViolationChange => "quota-violation",
            Self::AccountChange => "account-change",
        };
        f.write_str(s)
    }
}

/// A remote-change notification as delivered by the platform.
///
/// Both fields are optional: the platform's payload is loosely typed and a
/// notification missing either one is ignored by receivers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloudNotification {
    /// Raw reason code, see [`ChangeReason::from_code`].
    pub reason: Option<i64>,
    /// Keys whose values changed.
    pub changed_keys: Option<Vec<String>>,
}

impl CloudNotification {
    /// A well-formed notification.
    pub fn new<I, S>(reason: ChangeReason, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reason: Some(reason.code()),
            changed_keys: Some(keys.into_iter().map(Into::into).collect()),
        }
    }

    /// Decoded reason, if present and known.
    pub fn change_reason(&self) -> Option<ChangeReason> {
        self.reason.and_then(ChangeReason::from_code)
    }

    /// Whether `key` is listed among the changed keys.
    pub fn touches(&self, key: &str) -> bool {
        self.changed_keys
            .as_ref()
            .is_some_and(|keys| keys.iter().any(|k| k == key))
    }
}

/// Handle for a registered observer, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}
