use thiserror::Error;

/// Errors produced by the fetch + transcoding pipeline.
///
/// Every variant names the phase that failed, matching the error taxonomy in
/// the table-adapter's error design: network, protocol (HTTP framing), and
/// JSON errors are all fatal to the query and carry enough context to report
/// through the host's error-message channel without a second lookup.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("dns resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("tls handshake failed: {0}")]
    Tls(String),

    #[error("response headers exceeded {0} bytes without a terminator")]
    HeadersTooLarge(usize),

    #[error("malformed http response: {0}")]
    Protocol(String),

    #[error("malformed chunked transfer encoding: {0}")]
    ChunkFraming(String),

    #[error("connection closed before the response body completed")]
    UnexpectedEof,

    #[error("json parse error: {0}")]
    Json(String),

    #[error("json nesting exceeded max depth {0}")]
    DepthExceeded(usize),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
