//! A growable append/consume byte queue.
//!
//! Used both as the residue buffer between [`crate::http::HttpParser`] feeds
//! and as the outbound write queue owned by [`crate::connection::Connection`].

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// An ordered sequence of octets with O(1) amortized append and
/// prefix-consume. Consumed octets are never re-read.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    pub fn new() -> Self {
        ByteBuffer {
            inner: BytesMut::new(),
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.inner.extend_from_slice(bytes);
    }

    /// Returns the entire contents without consuming them.
    pub fn peek(&self) -> &[u8] {
        &self.inner
    }

    /// Removes and returns the first `n` bytes. Panics if `n > self.size()`,
    /// same as the teacher's `netbuf`-style buffers.
    pub fn consume(&mut self, n: usize) -> Bytes {
        self.inner.split_to(n).freeze()
    }

    pub fn size(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Writes as much of the buffer as the socket accepts right now and
    /// consumes exactly that many bytes. Returns the number of bytes
    /// written.
    pub async fn flush<W>(&mut self, sock: &mut W) -> std::io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        if self.inner.is_empty() {
            return Ok(0);
        }
        let written = sock.write(&self.inner).await?;
        self.inner.advance(written);
        Ok(written)
    }
}
