//! Client error types

use rtsig_core::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("protocol error: {0}")]
    Protocol(#[from] rtsig_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] rtsig_transport::TransportError),

    #[error("peer connection error: {0}")]
    Peer(#[from] PeerError),
}

impl ClientError {
    /// The disconnect code reported when this error ends a session
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            ClientError::Protocol(e) => e.code(),
            ClientError::Transport(_) => ErrorCode::WebsocketOnError,
            _ => ErrorCode::InternalError,
        }
    }
}

/// Failures reported by a peer connection facade
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeerError {
    #[error("failed to create peer connection: {0}")]
    CreateFailed(String),

    #[error("session description error: {0}")]
    Description(String),

    #[error("ice candidate error: {0}")]
    Candidate(String),

    #[error("stats error: {0}")]
    Stats(String),

    #[error("track error: {0}")]
    Track(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ClientError::InvalidParameter("role".into()).code(),
            ErrorCode::InvalidParameter
        );
        assert_eq!(
            ClientError::Protocol(rtsig_core::Error::DecodeError("x".into())).code(),
            ErrorCode::InvalidParameter
        );
        assert_eq!(
            ClientError::Peer(PeerError::Stats("gone".into())).code(),
            ErrorCode::InternalError
        );
        assert_eq!(
            ClientError::Transport(rtsig_transport::TransportError::NotConnected).code(),
            ErrorCode::WebsocketOnError
        );
    }
}
