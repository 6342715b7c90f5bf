//! Forward HTTP/1.x proxy core: incremental wire parsers plus the
//! per-client session state machine that drives them.
//!
//! `buffer`, `chunk`, `http`, `connection`, and `session` are the parser
//! core the spec names as the hard part; `config` and `listener` are the
//! ambient CLI and accept-loop wiring that `src/main.rs` drives.

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod listener;
pub mod session;

pub use buffer::ByteBuffer;
pub use chunk::{ChunkParser, ChunkState};
pub use config::ProxyConfig;
pub use connection::Connection;
pub use error::{ProxyError, ProxyResult};
pub use http::{HttpKind, HttpParser, ParsedUrl, ParserState};
pub use session::{ProxySession, SessionMode};
