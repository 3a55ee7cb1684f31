//! SDK error types

use thiserror::Error;

/// SDK error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to connect to the node.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] tonic::transport::Error),

    /// Invalid endpoint URI.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Request timed out.
    #[error("Request timeout")]
    Timeout,

    /// Transaction or state transition was rejected by the node.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// gRPC transport error.
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    /// Hex decode error.
    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// A response the server should never send.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Map a broadcast refusal onto [`Error::Rejected`], keeping the rest as
    /// plain gRPC errors.
    pub(crate) fn from_broadcast(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::AlreadyExists | tonic::Code::FailedPrecondition => {
                Error::Rejected(status.message().to_string())
            }
            tonic::Code::InvalidArgument => Error::InvalidArgument(status.message().to_string()),
            tonic::Code::DeadlineExceeded => Error::Timeout,
            _ => Error::Grpc(status),
        }
    }
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `NotFound` becomes `Ok(None)`; other errors pass through.
pub(crate) fn optional<T>(result: std::result::Result<T, tonic::Status>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
        Err(e) => Err(Error::Grpc(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Status;

    #[test]
    fn not_found_is_none() {
        assert!(matches!(optional::<u8>(Err(Status::not_found("x"))), Ok(None)));
        assert!(matches!(optional(Ok(3u8)), Ok(Some(3))));
        assert!(matches!(
            optional::<u8>(Err(Status::internal("boom"))),
            Err(Error::Grpc(_))
        ));
    }

    #[test]
    fn broadcast_refusals() {
        assert!(matches!(
            Error::from_broadcast(Status::already_exists("Transaction already in chain")),
            Error::Rejected(msg) if msg == "Transaction already in chain"
        ));
        assert!(matches!(
            Error::from_broadcast(Status::failed_precondition("bad")),
            Error::Rejected(_)
        ));
        assert!(matches!(
            Error::from_broadcast(Status::deadline_exceeded("late")),
            Error::Timeout
        ));
        assert!(matches!(
            Error::from_broadcast(Status::unavailable("down")),
            Error::Grpc(_)
        ));
    }
}
