use crate::record::ProtocolStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single forwarded FastCGI call.
///
/// Transport errors are terminal for the in-flight request; nothing is retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("FastCGI transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported FastCGI version: {0} (expected 1)")]
    UnsupportedVersion(u8),

    #[error("FastCGI record too large: {0} bytes")]
    RecordTooLarge(usize),

    #[error("FastCGI param name too long to fit in one record: {0} bytes")]
    NameTooLong(usize),

    #[error("truncated name-value pair: {0}")]
    TruncatedPair(&'static str),

    #[error("unexpected FastCGI request_id in response: {0}")]
    UnexpectedRequestId(u16),

    #[error("FastCGI application rejected the request: {0:?}")]
    Rejected(ProtocolStatus),

    #[error("malformed HTTP response {0:?}")]
    MalformedResponse(String),

    #[error("malformed HTTP status code {0:?}")]
    MalformedStatus(String),

    #[error("malformed HTTP version {0:?}")]
    MalformedVersion(String),

    #[error("malformed HTTP header line {0:?}")]
    MalformedHeader(String),

    #[error("malformed chunked encoding: {0}")]
    MalformedChunk(String),

    #[error("unexpected end of response stream")]
    UnexpectedEof,

    #[error("invalid FastCGI address (expected host:port, fastcgi://host:port or unix://path): {0}")]
    InvalidAddress(String),

    #[error("FastCGI connect timeout: {0}")]
    ConnectTimeout(String),

    #[error("FastCGI connection is unusable after an earlier failed request")]
    ConnectionBroken,
}

impl Error {
    /// True for errors raised while parsing the application's HTTP output.
    pub fn is_malformed_response(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse(_)
                | Self::MalformedStatus(_)
                | Self::MalformedVersion(_)
                | Self::MalformedHeader(_)
                | Self::MalformedChunk(_)
                | Self::UnexpectedEof
        )
    }
}
