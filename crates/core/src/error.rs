//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Preauth(#[from] PreauthError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by ACL mutation requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    #[error("invalid acl type: {0}")]
    InvalidCategory(String),

    #[error("too many users: nodes may have only one owner (got {0})")]
    TooManyOwners(usize),

    #[error("only the owner can change ownership of a node")]
    NotOwner,

    #[error("deleting ownership is not supported")]
    OwnerNotRemovable,
}

/// Errors raised while resolving or building indexes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("invalid index part: {0}")]
    InvalidPart(String),

    #[error("invalid index option: {0}")]
    InvalidOption(String),

    #[error("unknown index: {0}")]
    UnknownIndex(String),

    #[error("node has no file")]
    NoFile,
}

/// Errors raised when redeeming a preauth token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreauthError {
    #[error("preauth token not found: {0}")]
    NotFound(String),

    #[error("preauth token expired: {0}")]
    Expired(String),

    #[error("preauth token is for '{actual}', not '{expected}'")]
    ActionMismatch { expected: String, actual: String },

    #[error("unknown preauth action: {0}")]
    UnknownAction(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
