//! Error types for the cbstore storage engine.

use std::io;
use thiserror::Error;

/// The result type used throughout cbstore.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for cbstore operations.
///
/// Deleting an id that is already on the free list is *not* an error;
/// the delete operations report that case by returning `false`.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The tree structure and the storage metadata disagree.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// An entity with the same key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// No entity with the given key exists.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage has been closed.
    #[error("Storage is closed")]
    ClosedStorage,
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new duplicate key error.
    pub fn duplicate_key(msg: impl Into<String>) -> Self {
        Error::DuplicateKey(msg.into())
    }

    /// Creates a new key not found error.
    pub fn key_not_found(msg: impl Into<String>) -> Self {
        Error::KeyNotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
