//! Error types for rtsig

use std::fmt;
use thiserror::Error;

/// Result type alias for rtsig core operations
pub type Result<T> = std::result::Result<T, Error>;

/// rtsig core error types
#[derive(Error, Debug)]
pub enum Error {
    /// JSON encoding error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// JSON decoding error (malformed JSON or missing required field)
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Compression or decompression failure
    #[error("compression error: {0}")]
    CompressionError(String),

    /// Invalid parameter (unknown role, bad label, ...)
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// The disconnect code this error maps to when it ends a session
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::DecodeError(_) | Error::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Error::EncodeError(_) | Error::CompressionError(_) => ErrorCode::InternalError,
        }
    }
}

/// Disconnect codes surfaced to the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Explicit close outcomes
    CloseSucceeded = 0,
    CloseFailed = 1,

    // Caller errors
    InvalidParameter = 100,

    // Transport failures
    WebsocketHandshakeFailed = 200,
    WebsocketOnClose = 201,
    WebsocketOnError = 202,

    // Media-layer failures
    PeerConnectionStateFailed = 300,
    IceFailed = 301,

    InternalError = 500,
}

impl ErrorCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::CloseSucceeded),
            1 => Some(ErrorCode::CloseFailed),
            100 => Some(ErrorCode::InvalidParameter),
            200 => Some(ErrorCode::WebsocketHandshakeFailed),
            201 => Some(ErrorCode::WebsocketOnClose),
            202 => Some(ErrorCode::WebsocketOnError),
            300 => Some(ErrorCode::PeerConnectionStateFailed),
            301 => Some(ErrorCode::IceFailed),
            500 => Some(ErrorCode::InternalError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CloseSucceeded => "CLOSE_SUCCEEDED",
            ErrorCode::CloseFailed => "CLOSE_FAILED",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::WebsocketHandshakeFailed => "WEBSOCKET_HANDSHAKE_FAILED",
            ErrorCode::WebsocketOnClose => "WEBSOCKET_ONCLOSE",
            ErrorCode::WebsocketOnError => "WEBSOCKET_ONERROR",
            ErrorCode::PeerConnectionStateFailed => "PEER_CONNECTION_STATE_FAILED",
            ErrorCode::IceFailed => "ICE_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// True for the two outcomes of an explicit close
    pub fn is_close_outcome(&self) -> bool {
        matches!(self, ErrorCode::CloseSucceeded | ErrorCode::CloseFailed)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
