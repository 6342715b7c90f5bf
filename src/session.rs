//! The per-client state machine: consumes bytes from the client
//! [`Connection`], feeds the request parser, negotiates the upstream
//! connection (dial + optional Basic auth), rewrites and forwards the
//! request on the HTTP path, or establishes a raw tunnel for `CONNECT`.

use bytes::Bytes;
use log::{debug, info, trace};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use crate::connection::Connection;
use crate::error::{ProxyError, ProxyResult};
use crate::http::{HttpParser, ParserState, ParsedUrl};

/// Literal bytes written to the client immediately on a successful
/// `CONNECT`; the proxy never generates a "real" status line for the
/// tunnel, matching the reference implementation verbatim.
pub const PROXY_TUNNEL_ESTABLISHED_RESPONSE_PKT: &[u8] =
    b"HTTP/1.1 200 Connection established\r\n\r\n";

const PROXY_AUTH_FAILED_RESPONSE_PKT: &[u8] =
    b"HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic\r\n\r\n";

const BAD_GATEWAY_RESPONSE_PKT: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

const DEFAULT_UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Http,
    Tunnel,
}

/// Headers stripped before forwarding a rewritten request upstream.
const STRIPPED_REQUEST_HEADERS: [&[u8]; 3] = [b"host", b"proxy-authorization", b"proxy-connection"];

pub struct ProxySession {
    pub client: Connection,
    pub server: Option<Connection>,
    pub request: HttpParser,
    pub response: HttpParser,
    expected_credential: Option<Bytes>,
    pub mode: SessionMode,
    upstream_connect_timeout: Duration,
    request_forwarded_to: usize,
    /// `host:port` dialed for the current (non-CONNECT) request, fixed at
    /// dial time so the rewritten request's `Host` header always matches
    /// the address `derive_upstream_addr` actually resolved and connected
    /// to, even if `request.url()` is re-inspected later.
    upstream_host_header: Option<String>,
}

impl ProxySession {
    pub fn new(client: Connection, expected_credential: Option<Bytes>) -> Self {
        ProxySession {
            client,
            server: None,
            request: HttpParser::request(),
            response: HttpParser::response(),
            expected_credential,
            mode: SessionMode::Http,
            upstream_connect_timeout: DEFAULT_UPSTREAM_CONNECT_TIMEOUT,
            request_forwarded_to: 0,
            upstream_host_header: None,
        }
    }

    /// Drives the session end to end: reads from whichever peer is
    /// readable, alternating until either side closes or an error occurs.
    /// Both sockets are closed on every exit path.
    pub async fn run(&mut self) {
        let outcome = self.drive().await;
        if let Err(err) = &outcome {
            self.handle_terminal_error(err).await;
        }
        let _ = self.client.flush().await;
        self.client.close().await;
        if let Some(server) = self.server.as_mut() {
            let _ = server.flush().await;
            server.close().await;
        }
        match outcome {
            Ok(()) => info!("session with {:?} closed", self.client.addr),
            Err(err) => debug!("session with {:?} closed: {err}", self.client.addr),
        }
    }

    async fn drive(&mut self) -> ProxyResult<()> {
        loop {
            if self.server.is_none() {
                let data = self
                    .client
                    .recv_default()
                    .await
                    .map_err(ProxyError::ClientIo)?;
                if data.is_empty() {
                    return Ok(());
                }
                self.on_client_readable(&data).await?;
                self.flush_both().await?;
                continue;
            }

            let server = self.server.as_ref().expect("server present in this branch");
            tokio::select! {
                biased;

                res = self.client.readable() => {
                    res.map_err(ProxyError::ClientIo)?;
                    let data = self.client.recv_default().await.map_err(ProxyError::ClientIo)?;
                    if data.is_empty() {
                        return Ok(());
                    }
                    self.on_client_readable(&data).await?;
                    self.flush_both().await?;
                }
                res = server.readable() => {
                    res.map_err(ProxyError::UpstreamIo)?;
                    let data = self
                        .server
                        .as_mut()
                        .expect("server present")
                        .recv_default()
                        .await
                        .map_err(ProxyError::UpstreamIo)?;
                    if data.is_empty() {
                        self.on_server_eof()?;
                        return Ok(());
                    }
                    self.on_server_readable(&data)?;
                    self.flush_both().await?;
                }
            }

            if self.mode == SessionMode::Http && self.response.is_complete() {
                return Ok(());
            }
        }
    }

    /// Flushes whatever is queued on both Connections. The rewritten
    /// request (or the tunnel-established response) is queued during
    /// request processing above; writing it does not wait on the peer's
    /// own readability.
    async fn flush_both(&mut self) -> ProxyResult<()> {
        self.client.flush().await.map_err(ProxyError::ClientIo)?;
        if let Some(server) = self.server.as_mut() {
            server.flush().await.map_err(ProxyError::UpstreamIo)?;
        }
        Ok(())
    }

    async fn handle_terminal_error(&mut self, err: &ProxyError) {
        match err {
            ProxyError::ProxyAuthenticationFailed => {
                self.client.queue(PROXY_AUTH_FAILED_RESPONSE_PKT);
            }
            ProxyError::ProxyConnectionFailed(_) => {
                self.client.queue(BAD_GATEWAY_RESPONSE_PKT);
            }
            ProxyError::Parse(_) | ProxyError::ClientIo(_) | ProxyError::UpstreamIo(_) | ProxyError::NoUpstream => {
                // Closed without a response, per spec §7.
            }
        }
    }

    /// Feeds bytes from the client into the request pipeline. In `TUNNEL`
    /// mode this is a pure byte shuttle to the upstream; in `HTTP` mode it
    /// drives the request parser, negotiates/dials upstream on first sight
    /// of the parsed request line, and forwards the rewritten request once
    /// it is available.
    pub async fn on_client_readable(&mut self, data: &[u8]) -> ProxyResult<()> {
        if self.mode == SessionMode::Tunnel {
            if let Some(server) = self.server.as_mut() {
                server.queue(data);
            }
            return Ok(());
        }

        self.request.parse(data)?;

        if self.server.is_none() {
            // CONNECT's address is the authority-form target, available as
            // soon as the request line itself is parsed. A plain request's
            // address may fall back to the `Host` header (derive_upstream_addr),
            // and authentication inspects `Proxy-Authorization` -- both only
            // populated once the header block has actually been consumed.
            // Dialing (and authenticating) earlier than that would fire on a
            // fragmented feed that delivered only the request line so far.
            let ready = if self.request.is_connect() {
                self.request.state() >= ParserState::LineRcvd
            } else {
                self.request.state() >= ParserState::HeadersComplete
            };

            if ready {
                self.authenticate()?;
                let (host, port) = self.derive_upstream_addr()?;
                let server = self.dial_upstream(&host, port).await?;
                self.server = Some(server);

                if self.request.is_connect() {
                    self.client.queue(PROXY_TUNNEL_ESTABLISHED_RESPONSE_PKT);
                    self.mode = SessionMode::Tunnel;
                    return Ok(());
                }
                self.upstream_host_header = Some(format!("{host}:{port}"));
            }
        }

        if let Some(server) = self.server.as_mut() {
            if self.mode == SessionMode::Http && !self.request.is_connect() {
                let host_header = self
                    .upstream_host_header
                    .as_deref()
                    .expect("upstream_host_header set alongside server for non-CONNECT requests");
                Self::forward_rewritten_request(
                    &self.request,
                    host_header,
                    server,
                    &mut self.request_forwarded_to,
                );
            }
        }
        Ok(())
    }

    /// Writes the not-yet-forwarded tail of the rewritten request. Called
    /// once the request reaches `COMPLETE` (so the full, correct body
    /// length and header set are known); earlier states are conservative no-ops.
    /// `host_header` is the exact `host:port` `derive_upstream_addr` resolved
    /// and dialed, not re-derived from `request.url()`, so the rewritten
    /// `Host` header always matches the upstream the session actually
    /// connected to (spec §4.5 step 4).
    fn forward_rewritten_request(
        request: &HttpParser,
        host_header: &str,
        server: &mut Connection,
        forwarded_to: &mut usize,
    ) {
        if request.state() != ParserState::Complete || *forwarded_to > 0 {
            return;
        }
        let rewritten = request.build(
            &STRIPPED_REQUEST_HEADERS,
            &[(b"Host", host_header.as_bytes())],
        );
        server.queue(&rewritten);
        *forwarded_to = rewritten.len();
    }

    /// Feeds bytes from the upstream into the response pipeline (HTTP mode)
    /// or queues them verbatim to the client (TUNNEL mode). The parser is
    /// used only to observe completion; the bytes themselves always pass
    /// through unmodified.
    pub fn on_server_readable(&mut self, data: &[u8]) -> ProxyResult<()> {
        if self.mode == SessionMode::Tunnel {
            self.client.queue(data);
            return Ok(());
        }
        self.response.parse(data)?;
        self.client.queue(data);
        Ok(())
    }

    /// A clean EOF from the upstream. In HTTP mode this is how a response
    /// with neither `Content-Length` nor chunked framing is ever declared
    /// complete (spec §4.3, §7). In TUNNEL mode, either peer's EOF ends the
    /// session -- the caller treats this as a normal close.
    fn on_server_eof(&mut self) -> ProxyResult<()> {
        if self.mode == SessionMode::Http {
            self.response.finish();
        }
        Ok(())
    }

    fn authenticate(&self) -> ProxyResult<()> {
        let Some(expected) = &self.expected_credential else {
            return Ok(());
        };
        match self.request.headers().get("proxy-authorization") {
            Some(actual) if actual == expected => Ok(()),
            _ => Err(ProxyError::ProxyAuthenticationFailed),
        }
    }

    /// Derives the (host, port) to dial: authority form for `CONNECT`
    /// (port required), else the URL's hostname/port, the `Host` header,
    /// or the default port 80.
    fn derive_upstream_addr(&self) -> ProxyResult<(String, u16)> {
        if self.request.is_connect() {
            return match self.request.url() {
                ParsedUrl::Authority { host, port } => {
                    Ok((String::from_utf8_lossy(host).into_owned(), *port))
                }
                _ => Err(ProxyError::Parse(
                    crate::error::HttpParseError::ConnectTargetMissingPort,
                )),
            };
        }

        if let (Some(host), port) = (self.request.url().hostname(), self.request.url().port()) {
            let port = port.unwrap_or(80);
            return Ok((String::from_utf8_lossy(host).into_owned(), port));
        }

        if let Some(host_header) = self.request.headers().get("host") {
            let text = String::from_utf8_lossy(host_header);
            return Ok(split_host_port(&text));
        }

        Err(ProxyError::Parse(
            crate::error::HttpParseError::InvalidRequestTarget,
        ))
    }

    async fn dial_upstream(&self, host: &str, port: u16) -> ProxyResult<Connection> {
        trace!("dialing upstream {host}:{port}");
        let sock = timeout(self.upstream_connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                ProxyError::ProxyConnectionFailed(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "upstream connect timed out",
                ))
            })?
            .map_err(ProxyError::ProxyConnectionFailed)?;
        Ok(Connection::new(sock, host.to_string(), port))
    }
}

fn split_host_port(host_header: &str) -> (String, u16) {
    match host_header.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            (host.to_string(), port.parse().unwrap_or(80))
        }
        _ => (host_header.to_string(), 80),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn client_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept, connect) = tokio::join!(listener.accept(), connect);
        let (server_sock, _) = accept.unwrap();
        (Connection::new(server_sock, "client", 0), connect.unwrap())
    }

    #[tokio::test]
    async fn scenario9_http_get_dials_upstream_and_rewrites() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_port = origin.local_addr().unwrap().port();

        let origin_task = tokio::spawn(async move {
            let (mut sock, _) = origin.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            request
        });

        let (client_conn, mut client_sock) = client_pair().await;
        let mut session = ProxySession::new(client_conn, None);

        let partial = format!("GET http://127.0.0.1:{origin_port}/get HTTP/1.1\r\n");
        client_sock.write_all(partial.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = session.client.recv(4096).await.unwrap();
        session.on_client_readable(&n).await.unwrap();
        assert_ne!(session.request.state(), ParserState::Complete);
        assert!(session.server.is_none());

        let headers = format!("Host: 127.0.0.1:{origin_port}\r\nAccept: */*\r\n\r\n");
        client_sock.write_all(headers.as_bytes()).await.unwrap();
        let n2 = session.client.recv(4096).await.unwrap();
        session.on_client_readable(&n2).await.unwrap();
        assert_eq!(session.request.state(), ParserState::Complete);
        let server = session.server.as_ref().expect("upstream dialed");
        assert_eq!(server.addr.1, origin_port);

        session.server.as_mut().unwrap().flush().await.unwrap();
        assert_eq!(session.server.as_ref().unwrap().buffer_size(), 0);

        let forwarded = origin_task.await.unwrap();
        assert!(forwarded.starts_with("GET /get HTTP/1.1\r\n"));
        assert!(!forwarded.to_lowercase().contains("proxy-connection"));

        let _ = buf;
    }

    #[tokio::test]
    async fn scenario10_connect_switches_to_tunnel() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_port = origin.local_addr().unwrap().port();
        let origin_task = tokio::spawn(async move {
            let (mut sock, _) = origin.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(b"world").await.unwrap();
            buf
        });

        let (client_conn, mut client_sock) = client_pair().await;
        let mut session = ProxySession::new(client_conn, None);

        let connect_req = format!("CONNECT 127.0.0.1:{origin_port} HTTP/1.1\r\nHost: x\r\n\r\n");
        client_sock.write_all(connect_req.as_bytes()).await.unwrap();
        let data = session.client.recv(4096).await.unwrap();
        session.on_client_readable(&data).await.unwrap();

        assert_eq!(session.mode, SessionMode::Tunnel);
        session.client.flush().await.unwrap();
        let mut established = vec![0u8; PROXY_TUNNEL_ESTABLISHED_RESPONSE_PKT.len()];
        client_sock.read_exact(&mut established).await.unwrap();
        assert_eq!(established, PROXY_TUNNEL_ESTABLISHED_RESPONSE_PKT);

        client_sock.write_all(b"hello").await.unwrap();
        let tunneled = session.client.recv(4096).await.unwrap();
        session.on_client_readable(&tunneled).await.unwrap();
        session.server.as_mut().unwrap().flush().await.unwrap();

        let echoed = origin_task.await.unwrap();
        assert_eq!(&echoed, b"hello");

        let from_server = session.server.as_mut().unwrap().recv(4096).await.unwrap();
        session.on_server_readable(&from_server).unwrap();
        session.client.flush().await.unwrap();
        let mut back = [0u8; 5];
        client_sock.read_exact(&mut back).await.unwrap();
        assert_eq!(&back, b"world");
    }

    #[tokio::test]
    async fn scenario11_missing_credential_fails_auth() {
        let (client_conn, mut client_sock) = client_pair().await;
        let mut session = ProxySession::new(client_conn, Some(Bytes::from_static(b"Basic dXNlcjpwYXNz")));

        let req = b"GET http://example.com HTTP/1.1\r\nHost: example.com\r\n\r\n";
        client_sock.write_all(req).await.unwrap();
        let data = session.client.recv(4096).await.unwrap();
        let err = session.on_client_readable(&data).await.unwrap_err();
        assert!(matches!(err, ProxyError::ProxyAuthenticationFailed));
    }

    #[tokio::test]
    async fn scenario12_unresolvable_host_fails_connect() {
        let (client_conn, mut client_sock) = client_pair().await;
        let mut session = ProxySession::new(client_conn, None);

        let req = b"GET http://this-host-does-not-resolve.invalid/ HTTP/1.1\r\nHost: this-host-does-not-resolve.invalid\r\n\r\n";
        client_sock.write_all(req).await.unwrap();
        let data = session.client.recv(4096).await.unwrap();
        let err = session.on_client_readable(&data).await.unwrap_err();
        assert!(matches!(err, ProxyError::ProxyConnectionFailed(_)));
    }
}
