//! Incremental parser for HTTP chunked transfer-encoded bodies.

use bytes::{Bytes, BytesMut};
use memchr::memmem;

use crate::error::ChunkParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    WaitingForSize,
    WaitingForData,
    Complete,
}

/// Lifecycle: created empty in `WaitingForSize`; transitions irreversibly to
/// `Complete` upon reading a zero-sized chunk followed by its terminating
/// CRLF.
#[derive(Debug)]
pub struct ChunkParser {
    state: ChunkState,
    size: Option<usize>,
    chunk: BytesMut,
    body: BytesMut,
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkParser {
    pub fn new() -> Self {
        ChunkParser {
            state: ChunkState::WaitingForSize,
            size: None,
            chunk: BytesMut::new(),
            body: BytesMut::new(),
        }
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ChunkState::Complete
    }

    pub fn size(&self) -> Option<usize> {
        self.size
    }

    pub fn chunk(&self) -> &[u8] {
        &self.chunk
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body.freeze()
    }

    /// Consumes as much of `input` as possible, preserving the remainder in
    /// `self.chunk` for the next call.
    pub fn parse(&mut self, input: &[u8]) -> Result<(), ChunkParseError> {
        let mut working = BytesMut::with_capacity(self.chunk.len() + input.len());
        working.extend_from_slice(&self.chunk);
        working.extend_from_slice(input);
        self.chunk.clear();

        let mut pos = 0usize;
        loop {
            match self.state {
                ChunkState::Complete => break,
                ChunkState::WaitingForSize => {
                    match memmem::find(&working[pos..], b"\r\n") {
                        None => {
                            self.chunk = BytesMut::from(&working[pos..]);
                            break;
                        }
                        Some(idx) => {
                            let line = &working[pos..pos + idx];
                            if line.contains(&b';') {
                                return Err(ChunkParseError::UnsupportedExtension);
                            }
                            let size = parse_hex_size(line)?;
                            pos += idx + 2;
                            self.size = Some(size);
                            self.state = ChunkState::WaitingForData;
                        }
                    }
                }
                ChunkState::WaitingForData => {
                    let size = self.size.expect("size set when entering WaitingForData");
                    if working.len() - pos >= size + 2 {
                        self.body.extend_from_slice(&working[pos..pos + size]);
                        pos += size + 2;
                        self.size = None;
                        self.state = if size == 0 {
                            ChunkState::Complete
                        } else {
                            ChunkState::WaitingForSize
                        };
                    } else {
                        self.chunk = BytesMut::from(&working[pos..]);
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_hex_size(line: &[u8]) -> Result<usize, ChunkParseError> {
    if line.is_empty() {
        return Err(ChunkParseError::InvalidSize);
    }
    let text = std::str::from_utf8(line).map_err(|_| ChunkParseError::InvalidSize)?;
    usize::from_str_radix(text.trim(), 16).map_err(|_| ChunkParseError::InvalidSize)
}
