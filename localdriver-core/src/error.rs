//! Error types for LocalDriver
//!
//! Provides a unified error type for all LocalDriver operations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for LocalDriver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for LocalDriver
#[derive(Error, Debug)]
pub enum Error {
    // ===== Metadata Errors =====
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("the metadata of {kind} '{key}' vanished")]
    MetadataVanished { kind: &'static str, key: String },

    #[error("metadata inconsistency: {0}")]
    Inconsistency(String),

    #[error("metadata of network '{0}' does not exist")]
    NetworkMetadataMissing(String),

    #[error("no record carried by the metadata item")]
    NothingCarried,

    #[error("timed out after {waited:?} waiting for lock '{key}'")]
    LockTimeout { key: String, waited: Duration },

    // ===== Attachment Errors =====
    #[error("cannot determine device of attachment on host '{host}': {} new device(s) {gained:?}", .gained.len())]
    AmbiguousAttachment { host: String, gained: Vec<String> },

    #[error("volume '{volume}' is not attached to host '{host}'")]
    NotAttached { volume: String, host: String },

    #[error("volume '{volume}' is already attached to host '{host}'")]
    AlreadyAttached { volume: String, host: String },

    #[error("mount path '{path}' is already used on host '{host}'")]
    MountPathInUse { path: String, host: String },

    // ===== Storage Errors =====
    #[error("Storage error: {0}")]
    Store(String),

    #[error("Object too large: {size} bytes (max: {max})")]
    ObjectTooLarge { size: usize, max: usize },

    // ===== Provider Errors =====
    #[error("Hypervisor error: {0}")]
    Hypervisor(String),

    #[error("command '{command}' exited with {exit_code}: {stderr}")]
    RemoteCommand {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("'{0}' timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("malformed entry #{index} in catalog '{file}': {reason}")]
    MalformedCatalogEntry {
        file: String,
        index: usize,
        reason: String,
    },

    #[error("no template matching requested size")]
    NoTemplateMatch,

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether this error reports an absent record rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
