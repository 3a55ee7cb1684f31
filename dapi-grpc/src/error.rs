//! Error types for the gRPC API.

use thiserror::Error;
use tonic::Status;

use crate::chain::DecodeError;

/// Errors raised while answering a request, before they become a `Status`.
#[derive(Debug, Error)]
pub enum DapiError {
    /// Malformed or missing request parameters
    #[error("{0}")]
    InvalidArgument(String),

    /// Requested entity is absent
    #[error("{0}")]
    NotFound(String),

    /// Entity was already submitted
    #[error("{0}")]
    AlreadyExists(String),

    /// Backend refused the request in its current state
    #[error("{0}")]
    FailedPrecondition(String),

    /// Backend cannot be reached
    #[error("{0}")]
    Unavailable(String),

    /// Waited too long for a backend outcome
    #[error("{0}")]
    DeadlineExceeded(String),

    /// Subscription fell behind the event feed
    #[error("{0}")]
    Aborted(String),

    /// Backend does not support the request
    #[error("{0}")]
    Unimplemented(String),

    /// Unexpected backend fault
    #[error("{0}")]
    Internal(String),

    /// Chain data returned by a backend failed to decode
    #[error("invalid chain data: {0}")]
    Decode(#[from] DecodeError),

    /// Status returned by an upstream gRPC service, passed through as-is
    #[error("upstream: {}", .0.message())]
    Upstream(Box<Status>),
}

impl DapiError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        DapiError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        DapiError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        DapiError::Internal(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        DapiError::Unavailable(msg.into())
    }
}

impl From<Status> for DapiError {
    fn from(status: Status) -> Self {
        DapiError::Upstream(Box::new(status))
    }
}

impl From<DapiError> for Status {
    fn from(err: DapiError) -> Self {
        match err {
            DapiError::InvalidArgument(msg) => Status::invalid_argument(msg),
            DapiError::NotFound(msg) => Status::not_found(msg),
            DapiError::AlreadyExists(msg) => Status::already_exists(msg),
            DapiError::FailedPrecondition(msg) => Status::failed_precondition(msg),
            DapiError::Unavailable(msg) => Status::unavailable(msg),
            DapiError::DeadlineExceeded(msg) => Status::deadline_exceeded(msg),
            DapiError::Aborted(msg) => Status::aborted(msg),
            DapiError::Unimplemented(msg) => Status::unimplemented(msg),
            DapiError::Internal(msg) => Status::internal(msg),
            DapiError::Decode(err) => Status::internal(format!("invalid chain data: {}", err)),
            DapiError::Upstream(status) => *status,
        }
    }
}

/// Result type for DAPI operations
pub type DapiResult<T> = Result<T, DapiError>;
