//! Incremental parser for an HTTP/1.x request or response message: start
//! line, headers, and body (including delegation to [`ChunkParser`] for
//! chunked transfer encoding).

use bytes::{Bytes, BytesMut};
use memchr::memmem;

use super::headers::{is_chunked, trim_ows, HeaderMap};
use super::url::{parse_request_target, ParsedUrl};
use crate::chunk::ChunkParser;
use crate::error::HttpParseError;

const CRLF: &[u8] = b"\r\n";

/// Header block size cap (start line + headers), matching the teacher's
/// `req_hdr_max_size` config default.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpKind {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParserState {
    Initialized,
    LineRcvd,
    RcvingHeaders,
    HeadersComplete,
    RcvingBody,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingBody {
    None,
    Chunked,
    ContentLength(usize),
}

/// Incremental request/response parser. Accepts arbitrarily fragmented
/// input across repeated `parse` calls and preserves all state in between.
#[derive(Debug)]
pub struct HttpParser {
    kind: HttpKind,
    state: ParserState,
    buffer: BytesMut,
    max_header_bytes: usize,

    method: Option<Bytes>,
    url: ParsedUrl,

    code: Option<Bytes>,
    reason: Option<Bytes>,

    version: Option<Bytes>,
    headers: HeaderMap,
    body: BytesMut,
    pending_body: PendingBody,
    chunk_parser: Option<ChunkParser>,
}

impl HttpParser {
    pub fn request() -> Self {
        HttpParser::new(HttpKind::Request)
    }

    pub fn response() -> Self {
        HttpParser::new(HttpKind::Response)
    }

    pub fn new(kind: HttpKind) -> Self {
        HttpParser {
            kind,
            state: ParserState::Initialized,
            buffer: BytesMut::new(),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            method: None,
            url: ParsedUrl::None,
            code: None,
            reason: None,
            version: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            pending_body: PendingBody::None,
            chunk_parser: None,
        }
    }

    pub fn with_max_header_bytes(mut self, max: usize) -> Self {
        self.max_header_bytes = max;
        self
    }

    pub fn kind(&self) -> HttpKind {
        self.kind
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Complete
    }

    pub fn method(&self) -> Option<&Bytes> {
        self.method.as_ref()
    }

    pub fn is_connect(&self) -> bool {
        self.method
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(b"CONNECT"))
    }

    pub fn url(&self) -> &ParsedUrl {
        &self.url
    }

    pub fn code(&self) -> Option<&Bytes> {
        self.code.as_ref()
    }

    pub fn reason(&self) -> Option<&Bytes> {
        self.reason.as_ref()
    }

    pub fn version(&self) -> Option<&Bytes> {
        self.version.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Status code as an integer, if the status line has been parsed.
    pub fn status_code(&self) -> Option<u16> {
        self.code
            .as_ref()
            .and_then(|c| std::str::from_utf8(c).ok())
            .and_then(|s| s.parse().ok())
    }

    /// Advances the parser with newly-available bytes. Consumes as much of
    /// the combined residue+input as the current state allows, leaving the
    /// remainder in `self.buffer` for the next call.
    pub fn parse(&mut self, input: &[u8]) -> Result<(), HttpParseError> {
        if !input.is_empty() {
            self.buffer.extend_from_slice(input);
        }
        loop {
            if matches!(
                self.state,
                ParserState::Initialized | ParserState::LineRcvd | ParserState::RcvingHeaders
            ) && self.buffer.len() > self.max_header_bytes
            {
                return Err(HttpParseError::HeaderTooLarge);
            }
            match self.state {
                ParserState::Complete => break,
                ParserState::Initialized => match self.take_line() {
                    None => break,
                    Some(line) => {
                        self.parse_first_line(&line)?;
                        self.state = ParserState::LineRcvd;
                    }
                },
                ParserState::LineRcvd | ParserState::RcvingHeaders => {
                    let was_line_rcvd = self.state == ParserState::LineRcvd;
                    match self.take_line() {
                        None => break,
                        Some(line) => {
                            if was_line_rcvd {
                                self.state = ParserState::RcvingHeaders;
                                // Faithful reproduction of the reference parser's quirk:
                                // a blank line landing on the very transition from
                                // LineRcvd to RcvingHeaders is absorbed into the
                                // promotion itself and does not also trigger the
                                // end-of-headers check in the same step.
                                if !line.is_empty() {
                                    self.parse_header_line(&line)?;
                                }
                            } else if line.is_empty() {
                                self.finish_headers()?;
                            } else {
                                self.parse_header_line(&line)?;
                            }
                        }
                    }
                }
                ParserState::HeadersComplete => {
                    if matches!(self.pending_body, PendingBody::None) {
                        // Response with neither Content-Length nor chunked: only
                        // the caller (observing peer EOF) can advance this via
                        // `finish()`.
                        break;
                    }
                    if self.buffer.is_empty() {
                        break;
                    }
                    self.state = ParserState::RcvingBody;
                }
                ParserState::RcvingBody => {
                    self.consume_body()?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Called by the session when the peer has closed the connection. Only
    /// has an effect on a RESPONSE parser parked at `HeadersComplete` with
    /// no declared body length -- the one state the parser itself cannot
    /// resolve (see spec §4.3).
    pub fn finish(&mut self) {
        if self.state == ParserState::HeadersComplete && matches!(self.pending_body, PendingBody::None) {
            self.state = ParserState::Complete;
        }
    }

    fn take_line(&mut self) -> Option<Bytes> {
        let idx = memmem::find(&self.buffer, CRLF)?;
        let line = self.buffer.split_to(idx).freeze();
        let _ = self.buffer.split_to(2); // drop the CRLF itself
        Some(line)
    }

    fn parse_first_line(&mut self, line: &[u8]) -> Result<(), HttpParseError> {
        match self.kind {
            HttpKind::Request => {
                let mut parts = line.splitn(3, |&b| b == b' ');
                let method = parts.next().filter(|s| !s.is_empty());
                let target = parts.next();
                let version = parts.next();
                let (method, target, version) = match (method, target, version) {
                    (Some(m), Some(t), Some(v)) if !t.is_empty() && !v.is_empty() => (m, t, v),
                    _ => return Err(HttpParseError::InvalidFirstLine),
                };
                self.url = parse_request_target(method, target)?;
                self.method = Some(Bytes::copy_from_slice(method));
                self.version = Some(Bytes::copy_from_slice(version));
            }
            HttpKind::Response => {
                let (version, rest) =
                    split_once_space(line).ok_or(HttpParseError::InvalidFirstLine)?;
                let (code, reason) = split_once_space(rest).unwrap_or((rest, b""));
                if version.is_empty() || code.is_empty() {
                    return Err(HttpParseError::InvalidFirstLine);
                }
                self.version = Some(Bytes::copy_from_slice(version));
                self.code = Some(Bytes::copy_from_slice(code));
                self.reason = Some(Bytes::copy_from_slice(reason));
            }
        }
        Ok(())
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<(), HttpParseError> {
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(HttpParseError::InvalidHeaderLine)?;
        let name = &line[..colon];
        if name.is_empty() {
            return Err(HttpParseError::InvalidHeaderLine);
        }
        let value = trim_ows(&line[colon + 1..]);
        self.headers.insert(name, value);
        Ok(())
    }

    fn finish_headers(&mut self) -> Result<(), HttpParseError> {
        let chunked = self
            .headers
            .get("transfer-encoding")
            .is_some_and(|v| is_chunked(v));
        let content_length = match self.headers.get("content-length") {
            Some(v) => {
                let text = std::str::from_utf8(trim_ows(v))
                    .map_err(|_| HttpParseError::InvalidContentLength)?;
                Some(
                    text.parse::<usize>()
                        .map_err(|_| HttpParseError::InvalidContentLength)?,
                )
            }
            None => None,
        };

        self.pending_body = if self.is_connect() {
            // CONNECT requests complete at end of headers regardless of any
            // stray Content-Length/Transfer-Encoding a client might send.
            PendingBody::None
        } else if chunked {
            self.chunk_parser = Some(ChunkParser::new());
            PendingBody::Chunked
        } else {
            match content_length {
                Some(0) | None => PendingBody::None,
                Some(n) => PendingBody::ContentLength(n),
            }
        };

        self.state = match (self.kind, self.pending_body) {
            (_, PendingBody::None) if self.kind == HttpKind::Request => ParserState::Complete,
            (HttpKind::Response, PendingBody::None) => ParserState::HeadersComplete,
            (_, PendingBody::Chunked | PendingBody::ContentLength(_)) => {
                ParserState::HeadersComplete
            }
            (HttpKind::Request, PendingBody::None) => unreachable!(),
        };
        Ok(())
    }

    fn consume_body(&mut self) -> Result<(), HttpParseError> {
        match self.pending_body {
            PendingBody::Chunked => {
                let data = std::mem::take(&mut self.buffer);
                let cp = self
                    .chunk_parser
                    .as_mut()
                    .expect("chunk parser constructed when pending body is Chunked");
                cp.parse(&data)?;
                if cp.is_complete() {
                    self.body = BytesMut::from(cp.body());
                    self.state = ParserState::Complete;
                }
            }
            PendingBody::ContentLength(remaining) => {
                let take = remaining.min(self.buffer.len());
                let chunk = self.buffer.split_to(take);
                self.body.extend_from_slice(&chunk);
                let left = remaining - take;
                self.pending_body = PendingBody::ContentLength(left);
                if left == 0 {
                    self.state = ParserState::Complete;
                }
            }
            PendingBody::None => unreachable!("RcvingBody only entered with a pending body"),
        }
        Ok(())
    }

    /// Reconstructs the origin-form request target: `path [?query] [#fragment]`
    /// for absolute-form URLs (falling back to `/` when the URL carried no
    /// path segment), the original bytes for origin-form targets, or the
    /// legacy `/None` placeholder when no URL has been parsed at all.
    pub fn build_url(&self) -> Bytes {
        match &self.url {
            ParsedUrl::None => Bytes::from_static(b"/None"),
            ParsedUrl::Origin { raw, .. } => raw.clone(),
            ParsedUrl::Authority { .. } => Bytes::new(),
            ParsedUrl::Absolute {
                path,
                query,
                fragment,
                ..
            } => {
                let mut out = BytesMut::new();
                if path.is_empty() {
                    out.extend_from_slice(b"/");
                } else {
                    out.extend_from_slice(path);
                }
                if let Some(q) = query {
                    out.extend_from_slice(b"?");
                    out.extend_from_slice(q);
                }
                if let Some(f) = fragment {
                    out.extend_from_slice(b"#");
                    out.extend_from_slice(f);
                }
                out.freeze()
            }
        }
    }

    /// Reconstructs `METHOD SP build_url() SP HTTP-VERSION CRLF`, the
    /// surviving headers (those not named in `del_headers`, compared
    /// case-insensitively), the appended `add_headers`, a blank line, and
    /// the body. This is the origin-form rewrite the session forwards
    /// upstream.
    pub fn build(&self, del_headers: &[&[u8]], add_headers: &[(&[u8], &[u8])]) -> Bytes {
        let mut out = BytesMut::new();
        out.extend_from_slice(self.method.as_deref().unwrap_or(b""));
        out.extend_from_slice(b" ");
        out.extend_from_slice(&self.build_url());
        out.extend_from_slice(b" ");
        out.extend_from_slice(self.version.as_deref().unwrap_or(b"HTTP/1.1"));
        out.extend_from_slice(CRLF);

        for (_, (name, value)) in self.headers.iter() {
            let skip = del_headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case(&name.to_ascii_lowercase()));
            if skip {
                continue;
            }
            out.extend_from_slice(name);
            out.extend_from_slice(b": ");
            out.extend_from_slice(value);
            out.extend_from_slice(CRLF);
        }
        for (name, value) in add_headers {
            out.extend_from_slice(name);
            out.extend_from_slice(b": ");
            out.extend_from_slice(value);
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
        out.extend_from_slice(&self.body);
        out.freeze()
    }
}

fn split_once_space(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = line.iter().position(|&b| b == b' ')?;
    Some((&line[..idx], &line[idx + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragmentation_invariance_for_simple_get() {
        let whole: &[u8] = b"GET http://localhost:8080 HTTP/1.1\r\nHost: localhost:8080\r\n\r\n";
        let mut fed_whole = HttpParser::request();
        fed_whole.parse(whole).unwrap();

        for split in 1..whole.len() {
            let mut fragmented = HttpParser::request();
            fragmented.parse(&whole[..split]).unwrap();
            fragmented.parse(&whole[split..]).unwrap();
            assert_eq!(fragmented.state(), fed_whole.state());
            assert_eq!(fragmented.method(), fed_whole.method());
            assert_eq!(fragmented.url(), fed_whole.url());
            assert_eq!(fragmented.body(), fed_whole.body());
        }
    }

    #[test]
    fn quiescent_after_complete() {
        let mut p = HttpParser::request();
        p.parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(p.is_complete());
        assert!(p.buffer().is_empty());
        p.parse(b"").unwrap();
        assert!(p.is_complete());
    }

    #[test]
    fn scenario3_get_absolute_form_two_crlfs() {
        let mut p = HttpParser::request();
        p.parse(b"GET http://localhost:8080 HTTP/1.1\r\n").unwrap();
        assert_eq!(p.state(), ParserState::Initialized);

        p.parse(b"\r\n").unwrap();
        assert_eq!(p.state(), ParserState::LineRcvd);
        assert_eq!(p.method().unwrap(), "GET");
        assert_eq!(p.url().hostname(), Some(&b"localhost"[..]));
        assert_eq!(p.url().port(), Some(8080));

        p.parse(b"\r\n").unwrap();
        assert_eq!(p.state(), ParserState::Complete);
    }

    #[test]
    fn scenario4_connect_without_host_header() {
        let mut p = HttpParser::request();
        p.parse(b"CONNECT pypi.org:443 HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(p.state(), ParserState::RcvingHeaders);
        assert_eq!(p.method().unwrap(), "CONNECT");
        assert_eq!(p.version().unwrap(), "HTTP/1.0");
    }

    #[test]
    fn scenario5_post_fragmented_body() {
        let mut p = HttpParser::request();
        p.parse(b"POST http://localhost HTTP/1.1\r\nHost: localhost\r\nContent-Length: 7\r\nContent-Type: application/x-www-form-urlencoded")
            .unwrap();
        assert_eq!(p.state(), ParserState::RcvingHeaders);

        p.parse(b"\r\n").unwrap();
        assert_eq!(p.state(), ParserState::RcvingHeaders);

        p.parse(b"\r\n").unwrap();
        assert_eq!(p.state(), ParserState::HeadersComplete);

        p.parse(b"a=b").unwrap();
        assert_eq!(p.state(), ParserState::RcvingBody);
        assert_eq!(p.body(), b"a=b");

        p.parse(b"&c=d").unwrap();
        assert_eq!(p.state(), ParserState::Complete);
        assert_eq!(p.body(), b"a=b&c=d");
    }

    #[test]
    fn scenario6_response_content_length() {
        let mut p = HttpParser::response();
        p.parse(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n")
            .unwrap();
        assert_eq!(p.state(), ParserState::HeadersComplete);
        p.parse(b"hello").unwrap();
        assert_eq!(p.state(), ParserState::Complete);
        assert_eq!(p.body(), b"hello");
    }

    #[test]
    fn scenario7_response_chunked() {
        let mut p = HttpParser::response();
        p.parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap();
        assert_eq!(p.state(), ParserState::HeadersComplete);
        p.parse(b"4\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\n")
            .unwrap();
        assert_eq!(p.state(), ParserState::Complete);
        assert_eq!(p.body(), b"Wikipedia in\r\n\r\nchunks.");
    }

    #[test]
    fn scenario8_response_without_content_length_parks_then_finishes() {
        let mut p = HttpParser::response();
        p.parse(b"HTTP/1.0 200 OK\r\nServer: x\r\n\r\n").unwrap();
        assert_eq!(p.state(), ParserState::HeadersComplete);
        p.parse(b"").unwrap();
        assert_eq!(p.state(), ParserState::HeadersComplete);
        p.finish();
        assert_eq!(p.state(), ParserState::Complete);
    }

    #[test]
    fn build_url_none_variant_is_legacy_quirk() {
        let p = HttpParser::request();
        assert_eq!(p.build_url(), &b"/None"[..]);
    }

    #[test]
    fn build_url_falls_back_to_slash_for_pathless_absolute() {
        let mut p = HttpParser::request();
        p.parse(b"POST http://localhost HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
        assert_eq!(p.build_url(), &b"/"[..]);
    }

    #[test]
    fn round_trip_rewrites_absolute_to_origin_form() {
        let mut p = HttpParser::request();
        let raw = b"GET https://example.com/path/dir/?a=b&c=d#p=q HTTP/1.1\r\nHost: example.com\r\n\r\n";
        p.parse(raw).unwrap();
        assert_eq!(p.build_url(), &b"/path/dir/?a=b&c=d#p=q"[..]);
        let rebuilt = p.build(&[b"host"], &[(b"Host", b"example.com")]);
        let expected = b"GET /path/dir/?a=b&c=d#p=q HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(rebuilt.len(), expected.len());
    }

    #[test]
    fn response_status_code_accessor() {
        let mut p = HttpParser::response();
        p.parse(b"HTTP/1.1 301 Moved Permanently\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
        assert_eq!(p.status_code(), Some(301));
        assert_eq!(p.reason().unwrap(), "Moved Permanently");
    }

    #[test]
    fn header_block_too_large_is_rejected() {
        let mut p = HttpParser::request().with_max_header_bytes(64);
        let mut line = Vec::new();
        line.extend_from_slice(b"GET / HTTP/1.1\r\n");
        line.extend_from_slice(&vec![b'a'; 128]);
        let err = p.parse(&line).unwrap_err();
        assert_eq!(err, HttpParseError::HeaderTooLarge);
    }

    #[test]
    fn malformed_first_line_is_rejected() {
        let mut p = HttpParser::request();
        let err = p.parse(b"GET\r\n\r\n").unwrap_err();
        assert_eq!(err, HttpParseError::InvalidFirstLine);
    }
}
