#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnyxError {
    #[error("task title must not be empty")]
    EmptyTitle,

    #[error("no task found matching pattern: {0}")]
    TaskNotFound(String),

    #[error("multiple tasks match pattern '{pattern}': {matches} matches")]
    AmbiguousTask { pattern: String, matches: usize },

    #[error("invalid date/time '{input}': {msg}")]
    InvalidDateTime { input: String, msg: String },

    #[error("invalid storage key '{key}': {msg}")]
    InvalidStorageKey { key: String, msg: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config key '{0}'")]
    InvalidConfigKey(String),

    #[error("invalid config value for '{key}': {msg}")]
    InvalidConfigValue { key: String, msg: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}
