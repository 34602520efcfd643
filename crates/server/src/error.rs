//! API error types.

use crate::node_store::NodeStoreError;
use crate::preauth::PreauthServiceError;
use crate::streamer::StreamError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use silo_core::{AclError, IndexError, PreauthError};
use silo_metadata::MetadataError;
use silo_storage::StorageError;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Credentials were presented but are not valid, or none were presented
    /// where they are required.
    #[error("{0}")]
    Unauthenticated(String),

    /// The requester is known but lacks the right for this operation.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    /// A concurrent modification won and retries were exhausted.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BackendUnavailable(String),

    /// Assembling the response body failed before any byte was sent.
    #[error("{0}")]
    Stream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::Stream(_) => "stream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Stream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn unauthorized() -> Self {
        Self::Unauthorized("User Unauthorized".to_string())
    }

    pub fn node_not_found() -> Self {
        Self::NotFound("Node not found".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => Self::NotFound(format!("object not found: {key}")),
            StorageError::InvalidKey(_) => Self::InvalidRequest(e.to_string()),
            StorageError::Io(_) | StorageError::Config(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<MetadataError> for ApiError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound(msg) => Self::NotFound(msg),
            MetadataError::AlreadyExists(msg) => Self::Conflict(msg),
            MetadataError::VersionConflict { .. } => Self::Conflict(e.to_string()),
            MetadataError::Unavailable(msg) => Self::BackendUnavailable(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AclError> for ApiError {
    fn from(e: AclError) -> Self {
        match e {
            AclError::InvalidCategory(_) => Self::InvalidRequest("Invalid acl type".to_string()),
            AclError::TooManyOwners(_) => {
                Self::InvalidRequest("Too many users. Nodes may have only one owner.".to_string())
            }
            AclError::NotOwner => {
                Self::InvalidRequest("Only owner can change ownership of Node.".to_string())
            }
            AclError::OwnerNotRemovable => Self::InvalidRequest(
                "Deleting ownership is not a supported request type.".to_string(),
            ),
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::NoFile => Self::InvalidRequest("Node has no file".to_string()),
            IndexError::UnknownIndex(_) => Self::InvalidRequest("Invalid index".to_string()),
            IndexError::InvalidPart(_) => Self::InvalidRequest("Invalid index part".to_string()),
            IndexError::InvalidOption(msg) => Self::InvalidRequest(msg),
        }
    }
}

impl From<PreauthError> for ApiError {
    fn from(e: PreauthError) -> Self {
        match e {
            PreauthError::NotFound(_) | PreauthError::Expired(_) => Self::NotFound(e.to_string()),
            PreauthError::ActionMismatch { .. } | PreauthError::UnknownAction(_) => {
                Self::InvalidRequest(e.to_string())
            }
        }
    }
}

impl From<silo_core::Error> for ApiError {
    fn from(e: silo_core::Error) -> Self {
        match e {
            silo_core::Error::Acl(e) => e.into(),
            silo_core::Error::Index(e) => e.into(),
            silo_core::Error::Preauth(e) => e.into(),
            silo_core::Error::InvalidId(msg) => Self::InvalidRequest(format!("invalid id: {msg}")),
            silo_core::Error::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<NodeStoreError> for ApiError {
    fn from(e: NodeStoreError) -> Self {
        match e {
            NodeStoreError::NotFound(_) => Self::node_not_found(),
            NodeStoreError::Unauthorized => Self::unauthorized(),
            NodeStoreError::Conflict(id) => Self::Conflict(format!(
                "node {id} was modified concurrently, retry the request"
            )),
            NodeStoreError::Unavailable(msg) => Self::BackendUnavailable(msg),
            NodeStoreError::Snapshot { .. } => Self::Internal(e.to_string()),
            NodeStoreError::Metadata(e) => e.into(),
            NodeStoreError::Storage(e) => e.into(),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Payload(StorageError::NotFound(_)) => {
                Self::NotFound("Node file not found".to_string())
            }
            other => Self::Stream(other.to_string()),
        }
    }
}

impl From<PreauthServiceError> for ApiError {
    fn from(e: PreauthServiceError) -> Self {
        match e {
            PreauthServiceError::Token(e) => e.into(),
            PreauthServiceError::Metadata(e) => e.into(),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
