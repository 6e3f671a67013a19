//! Error types for config generation.
//!
//! Every error here aborts the current poll cycle's config update. The poll
//! loop logs it and tries again on the next tick.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while deriving, rendering or materializing log shipper config.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The allocation references a task group its job does not define.
    #[error("task group {task_group:?} not found for allocation {alloc_id}")]
    Lookup { alloc_id: String, task_group: String },

    /// A task's metadata override could not be parsed.
    #[error("invalid value for {key} on task {task}: {reason}")]
    Validation {
        task: String,
        key: String,
        reason: String,
    },

    /// Reading or writing the target config file failed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured metadata prefix cannot be compiled into a matcher.
    #[error("invalid metadata prefix: {0}")]
    InvalidPrefix(#[from] regex::Error),

    /// The reload command could not be started or exited non-zero.
    #[error("reload command {command:?} failed: {reason}")]
    Command { command: String, reason: String },

    /// A backend template is malformed or could not be rendered.
    #[error("template error: {0}")]
    Template(String),

    /// A structured config document could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

impl LoggerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LoggerError>;
