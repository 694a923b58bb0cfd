use std::path::{Path, PathBuf};

use pobj_codec::{envelope, Codec};
use pobj_store::atomic::{read_if_exists, remove_if_exists, write_atomic};
use tracing::{debug, warn};

use crate::channel::NotificationChannel;
use crate::error::{BackendError, BackendResult};
use crate::traits::{decode_or_absent, Backend};

/// Persists the value to one file.
///
/// The encoded value is sealed in a checksummed envelope and written by
/// atomic rename, so a crash mid-write leaves the previous record intact.
/// Nothing else is expected to modify the file, so the notification channel
/// never fires.
pub struct FileBackend<T, C> {
    path: PathBuf,
    codec: C,
    channel: NotificationChannel<T>,
}

impl<T, C> FileBackend<T, C>
where
    C: Codec<T>,
{
    pub fn new(path: impl Into<PathBuf>, codec: C) -> Self {
        Self {
            path: path.into(),
            codec,
            channel: NotificationChannel::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> BackendError {
        BackendError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl<T, C> Backend for FileBackend<T, C>
where
    C: Codec<T>,
{
    type Value = T;

    fn archive(&self, value: Option<&T>) -> BackendResult<()> {
        match value {
            Some(value) => {
                let payload = self.codec.encode(value)?;
                let sealed = envelope::seal(&payload)?;
                write_atomic(&self.path, &sealed).map_err(|e| self.io_error(e))?;
                debug!(path = %self.path.display(), len = payload.len(), "record archived");
            }
            None => {
                let removed = remove_if_exists(&self.path).map_err(|e| self.io_error(e))?;
                debug!(path = %self.path.display(), removed, "record deleted");
            }
        }
        Ok(())
    }

    fn unarchive(&self) -> Option<T> {
        let data = match read_if_exists(&self.path) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "record could not be read");
                return None;
            }
        };
        let payload = match envelope::open(&data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "record envelope rejected");
                return None;
            }
        };
        decode_or_absent(&self.codec, payload, &self.location())
    }

    fn synchronize(&self) -> BackendResult<()> {
        Ok(())
    }

    fn channel(&self) -> &NotificationChannel<T> {
        &self.channel
    }

    fn location(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
