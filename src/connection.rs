//! Thin adapter around a stream socket: non-blocking-style receive, an
//! outbound [`ByteBuffer`] queue, and a flush operation. Owned by exactly
//! one [`crate::session::ProxySession`]; never shared or locked.

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::buffer::ByteBuffer;

/// Default read chunk size, matching the reference implementation's
/// `recv(8192)`.
pub const DEFAULT_RECV_SIZE: usize = 8192;

/// A connected socket plus its outbound write queue. `addr` is the peer
/// address, kept for logging and for deriving the upstream routing key.
pub struct Connection {
    sock: TcpStream,
    pub buffer: ByteBuffer,
    pub addr: (Bytes, u16),
}

impl Connection {
    pub fn new(sock: TcpStream, host: impl Into<Bytes>, port: u16) -> Self {
        Connection {
            sock,
            buffer: ByteBuffer::new(),
            addr: (host.into(), port),
        }
    }

    /// Reads up to `n` bytes. Returns an empty `Bytes` on a clean peer EOF;
    /// propagates any I/O error.
    pub async fn recv(&mut self, n: usize) -> std::io::Result<Bytes> {
        let mut buf = vec![0u8; n];
        let read = AsyncReadExt::read(&mut self.sock, &mut buf).await?;
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }

    pub async fn recv_default(&mut self) -> std::io::Result<Bytes> {
        self.recv(DEFAULT_RECV_SIZE).await
    }

    pub fn queue(&mut self, data: &[u8]) {
        self.buffer.append(data);
    }

    /// Writes as much of the outbound buffer as the socket currently
    /// accepts, retaining the rest for a subsequent flush.
    pub async fn flush(&mut self) -> std::io::Result<usize> {
        self.buffer.flush(&mut self.sock).await
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.size()
    }

    pub async fn close(&mut self) {
        use tokio::io::AsyncWriteExt;
        let _ = self.sock.shutdown().await;
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.sock.peer_addr()
    }

    /// Waits until the underlying socket has data to read, without
    /// consuming any of it. Drives the session's `tokio::select!` loop.
    pub async fn readable(&self) -> std::io::Result<()> {
        self.sock.readable().await
    }
}
