//! HTTP/1.x wire parsing: request-target grammar, header storage, and the
//! incremental request/response parser built on top of them.

pub mod headers;
mod parser;
pub mod url;

pub use parser::{HttpKind, HttpParser, ParserState, DEFAULT_MAX_HEADER_BYTES};
pub use url::ParsedUrl;
