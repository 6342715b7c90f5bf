//! Error taxonomy for the parser core and the per-client session.

use thiserror::Error;

/// Errors raised while decoding chunked transfer-encoded bodies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkParseError {
    #[error("invalid chunk size line")]
    InvalidSize,
    #[error("chunk extensions are not supported")]
    UnsupportedExtension,
}

/// Errors raised while decoding an HTTP/1.x request or response message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpParseError {
    #[error("malformed request or status line")]
    InvalidFirstLine,
    #[error("malformed header line")]
    InvalidHeaderLine,
    #[error("invalid content-length value")]
    InvalidContentLength,
    #[error("malformed request target")]
    InvalidRequestTarget,
    #[error("CONNECT request target is missing a port")]
    ConnectTargetMissingPort,
    #[error("header block exceeds the configured size cap")]
    HeaderTooLarge,
    #[error(transparent)]
    Chunk(#[from] ChunkParseError),
}

/// Errors surfaced by [`crate::session::ProxySession`].
///
/// Each variant maps to a specific client-visible outcome: a status line, or
/// a silent close. See `_process_request`/`_process_response` in
/// `SPEC_FULL.md` §7.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy authentication failed")]
    ProxyAuthenticationFailed,
    #[error("failed to connect upstream: {0}")]
    ProxyConnectionFailed(#[source] std::io::Error),
    #[error("request parse error: {0}")]
    Parse(#[from] HttpParseError),
    #[error("client connection error: {0}")]
    ClientIo(#[source] std::io::Error),
    #[error("upstream connection error: {0}")]
    UpstreamIo(#[source] std::io::Error),
    #[error("no upstream connection established yet")]
    NoUpstream,
}

pub type ProxyResult<T> = Result<T, ProxyError>;
