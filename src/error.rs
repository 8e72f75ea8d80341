//! Errors raised while decoding, negotiating or driving a connection.

use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeaderLine(String),

    #[error("connection closed before the request head was complete")]
    IncompleteRequest,

    #[error("connection closed after {received} of {expected} body bytes")]
    TruncatedBody { expected: usize, received: usize },

    #[error("connection closed in the middle of a frame")]
    TruncatedFrame,

    #[error("frame declares a payload of {0} bytes")]
    FrameTooLarge(u64),

    #[error("text frame is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("no reason phrase for status code {0}")]
    UnknownStatusCode(u16),

    #[error("missing Sec-WebSocket-Key header")]
    MissingHandshakeKey,

    #[error("unsupported opcode {0:#x}")]
    UnsupportedOpcode(u8),

    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("session is closed")]
    SessionClosed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True for errors caused by bytes the peer sent.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Error::MalformedRequestLine(_)
                | Error::MalformedHeaderLine(_)
                | Error::IncompleteRequest
                | Error::TruncatedBody { .. }
                | Error::TruncatedFrame
                | Error::FrameTooLarge(_)
                | Error::InvalidUtf8(_)
        )
    }
}
