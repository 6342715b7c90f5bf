//! Parsing of the HTTP request-target grammar (RFC 7230 §5.3): absolute-form,
//! origin-form, and authority-form (CONNECT only).

use bytes::Bytes;

use crate::error::HttpParseError;

/// Tagged variant standing in for the dynamically-typed `url` field of the
/// reference parser: absent, authority-only (CONNECT), a full absolute URL,
/// or an origin-form target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedUrl {
    None,
    Authority {
        host: Bytes,
        port: u16,
    },
    Absolute {
        scheme: Bytes,
        host: Bytes,
        port: Option<u16>,
        /// Empty when the original target had no path segment at all (e.g.
        /// `http://localhost:8080`) -- see `build_url()`'s `/None` quirk.
        path: Bytes,
        query: Option<Bytes>,
        fragment: Option<Bytes>,
    },
    Origin {
        raw: Bytes,
        path: Bytes,
        query: Option<Bytes>,
        fragment: Option<Bytes>,
    },
}

impl ParsedUrl {
    pub fn hostname(&self) -> Option<&[u8]> {
        match self {
            ParsedUrl::None | ParsedUrl::Origin { .. } => None,
            ParsedUrl::Authority { host, .. } => Some(host),
            ParsedUrl::Absolute { host, .. } => Some(host),
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            ParsedUrl::None | ParsedUrl::Origin { .. } => None,
            ParsedUrl::Authority { port, .. } => Some(*port),
            ParsedUrl::Absolute { port, .. } => *port,
        }
    }
}

pub fn parse_request_target(method: &[u8], target: &[u8]) -> Result<ParsedUrl, HttpParseError> {
    if method.eq_ignore_ascii_case(b"CONNECT") {
        return parse_authority_form(target);
    }
    if target.starts_with(b"/") {
        return Ok(parse_origin_form(target));
    }
    if target.windows(3).any(|w| w == b"://") {
        return parse_absolute_form(target);
    }
    Err(HttpParseError::InvalidRequestTarget)
}

fn parse_authority_form(target: &[u8]) -> Result<ParsedUrl, HttpParseError> {
    let colon = rposition(target, b':').ok_or(HttpParseError::ConnectTargetMissingPort)?;
    let host = &target[..colon];
    let port_bytes = &target[colon + 1..];
    let port = parse_port(port_bytes).ok_or(HttpParseError::ConnectTargetMissingPort)?;
    Ok(ParsedUrl::Authority {
        host: Bytes::copy_from_slice(host),
        port,
    })
}

fn parse_origin_form(target: &[u8]) -> ParsedUrl {
    let (path_and_query, fragment) = split_once(target, b'#');
    let (path, query) = split_once(path_and_query, b'?');
    ParsedUrl::Origin {
        raw: Bytes::copy_from_slice(target),
        path: Bytes::copy_from_slice(path),
        query: query.map(Bytes::copy_from_slice),
        fragment: fragment.map(Bytes::copy_from_slice),
    }
}

fn parse_absolute_form(target: &[u8]) -> Result<ParsedUrl, HttpParseError> {
    let scheme_end = target
        .windows(3)
        .position(|w| w == b"://")
        .ok_or(HttpParseError::InvalidRequestTarget)?;
    let scheme = &target[..scheme_end];
    let rest = &target[scheme_end + 3..];

    // authority ends at the first of '/', '?', '#', or end of string.
    let authority_end = rest
        .iter()
        .position(|&b| b == b'/' || b == b'?' || b == b'#')
        .unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let after_authority = &rest[authority_end..];

    let (host, port) = match rposition(authority, b':') {
        Some(colon) => {
            let port = parse_port(&authority[colon + 1..]);
            match port {
                Some(p) => (&authority[..colon], Some(p)),
                None => (authority, None),
            }
        }
        None => (authority, None),
    };
    if host.is_empty() {
        return Err(HttpParseError::InvalidRequestTarget);
    }

    let (path_and_query, fragment) = split_once(after_authority, b'#');
    let (path, query) = split_once(path_and_query, b'?');

    Ok(ParsedUrl::Absolute {
        scheme: Bytes::copy_from_slice(scheme),
        host: Bytes::copy_from_slice(host),
        port,
        path: Bytes::copy_from_slice(path),
        query: query.map(Bytes::copy_from_slice),
        fragment: fragment.map(Bytes::copy_from_slice),
    })
}

fn split_once(haystack: &[u8], needle: u8) -> (&[u8], Option<&[u8]>) {
    match haystack.iter().position(|&b| b == needle) {
        Some(idx) => (&haystack[..idx], Some(&haystack[idx + 1..])),
        None => (haystack, None),
    }
}

fn rposition(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().rposition(|&b| b == needle)
}

fn parse_port(bytes: &[u8]) -> Option<u16> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
