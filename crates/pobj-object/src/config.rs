use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// How a persistent object reacts to application lifecycle transitions.
///
/// Only consulted when a [`LifecycleSource`](crate::LifecycleSource) is
/// attached. Missing TOML fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    /// Call `synchronize()` when the application returns to the foreground.
    pub synchronize_on_foreground: bool,
    /// Call `save()` when the application enters the background.
    pub save_on_background: bool,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            synchronize_on_foreground: true,
            save_on_background: true,
        }
    }
}

impl ObjectConfig {
    /// Never touch storage on lifecycle transitions; only drop saves.
    pub fn manual() -> Self {
        Self {
            synchronize_on_foreground: false,
            save_on_background: false,
        }
    }

    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
