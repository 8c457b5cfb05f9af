use std::{env, path::PathBuf};

use crate::{models::Filter, storage::DEFAULT_QUOTA_BYTES};

pub const DEFAULT_STORAGE_KEY: &str = "todo-app-todos";
pub const DEFAULT_DATA_PATH: &str = "todos.json";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must not be empty")]
    Empty { var: &'static str },

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Key holding the whole serialized collection.
    pub storage_key: String,
    /// File backing the store in the command line host.
    pub data_path: PathBuf,
    pub quota_bytes: usize,
    pub default_filter: Filter,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            default_filter: Filter::All,
        }
    }
}

impl AppConfig {
    /// Reads `TODO_STORAGE_KEY`, `TODO_DATA_PATH`, `TODO_STORAGE_QUOTA` and
    /// `TODO_DEFAULT_FILTER`, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(key) = lookup("TODO_STORAGE_KEY") {
            if key.trim().is_empty() {
                return Err(ConfigError::Empty {
                    var: "TODO_STORAGE_KEY",
                });
            }
            config.storage_key = key;
        }

        if let Some(path) = lookup("TODO_DATA_PATH") {
            if path.trim().is_empty() {
                return Err(ConfigError::Empty {
                    var: "TODO_DATA_PATH",
                });
            }
            config.data_path = PathBuf::from(path);
        }

        if let Some(quota) = lookup("TODO_STORAGE_QUOTA") {
            config.quota_bytes = quota.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    var: "TODO_STORAGE_QUOTA",
                    value: quota.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        if let Some(filter) = lookup("TODO_DEFAULT_FILTER") {
            config.default_filter = filter.parse().map_err(|e: crate::models::ParseFilterError| {
                ConfigError::Invalid {
                    var: "TODO_DEFAULT_FILTER",
                    value: filter.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        Ok(config)
    }
}
