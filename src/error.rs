//! Error types for the layout core, the remote store and the device cache.

use std::fmt;

use thiserror::Error;

/// What kind of entity a [`LayoutError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Tab,
    Component,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Tab => f.write_str("tab"),
            EntityKind::Component => f.write_str("component"),
        }
    }
}

/// Rejections raised synchronously by the layout manager.  State is left
/// unchanged whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} `{id}` not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("unknown component type `{0}`")]
    UnknownComponentType(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl LayoutError {
    pub fn tab_not_found(id: &str) -> Self {
        LayoutError::NotFound { kind: EntityKind::Tab, id: id.to_string() }
    }

    pub fn component_not_found(id: &str) -> Self {
        LayoutError::NotFound { kind: EntityKind::Component, id: id.to_string() }
    }
}

/// Failures talking to the remote per-user store.  Always recoverable: the
/// caller keeps its last known good local state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("not authorized")]
    Unauthorized,

    #[error("could not decode payload: {0}")]
    Decode(String),

    #[error("persistent store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Decode(err.to_string())
    }
}

/// Failures of the on-device key-value cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("quota exceeded while writing `{key}`")]
    QuotaExceeded { key: String },

    #[error("local storage unavailable: {0}")]
    Unavailable(String),

    #[error("could not serialize cache entry: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
