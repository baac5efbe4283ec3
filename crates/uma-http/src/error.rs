use anyhow::Error;
use thiserror::Error;

/// Malformed request data received from the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid request line")]
    InvalidRequestLine,
    #[error("invalid header")]
    InvalidHeader,
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),
    #[error("invalid chunk size line")]
    InvalidChunkSize,
    #[error("missing chunk terminator")]
    InvalidChunkTerminator,
    #[error("body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

/// Response handed back by the application that can't be put on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("invalid value for header {0:?}")]
    InvalidHeaderValue(String),
    #[error("body writer already closed")]
    WriterClosed,
}

/// Failure of a single request cycle on a connection.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("failed to parse request")]
    Parse(#[from] ParseError),
    #[error("failed to form response")]
    Response(#[from] ResponseError),
    #[error("application failed")]
    Application(#[source] Error),
    #[error("application panicked: {0}")]
    Panic(String),
}

impl HttpError {
    /// Status code of the best-effort error response for this error.
    pub fn status(&self) -> u16 {
        match self {
            HttpError::Parse(ParseError::BodyTooLarge(_)) => 413,
            HttpError::Parse(_) => 400,
            _ => 500,
        }
    }
}
