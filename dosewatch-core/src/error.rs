//! Error type for the adherence engine.
//!
//! Most failures in dosewatch are best-effort: a notification that could not be
//! delivered is logged and forgotten. Storage writes are the exception and are
//! always surfaced to the caller.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DoseError {
    /// I/O errors while reading or writing the state file.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON serialization/deserialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Invalid schedule definition (empty, duplicate labels, bad times).
    #[error("schedule error: {message}")]
    Schedule { message: String },

    /// Notification gateway failures.
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("config error: {message}")]
    Config { message: String },
}

pub type Result<T> = std::result::Result<T, DoseError>;

impl DoseError {
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn schedule(message: impl Into<String>) -> Self {
        Self::Schedule {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for DoseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Best-effort handling: log the failure and carry on with a fallback.
pub trait FailOpen<T> {
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default;

}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (using default)", context, err);
                T::default()
            }
        }
    }
}
