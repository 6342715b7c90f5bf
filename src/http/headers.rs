//! Case-insensitive header storage and the small set of token-matching
//! helpers the session and parser need (`chunked`, `close`, content-length).

use ahash::AHashMap;
use bytes::Bytes;

/// Mapping from lowercased header name to `(original-case name, value)`.
/// Preserves the first-seen casing and the last-seen value on duplicates.
#[derive(Debug, Default, Clone)]
pub struct HeaderMap {
    entries: AHashMap<Bytes, (Bytes, Bytes)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        HeaderMap {
            entries: AHashMap::new(),
        }
    }

    pub fn insert(&mut self, name: &[u8], value: &[u8]) {
        let key = Bytes::copy_from_slice(&name.to_ascii_lowercase());
        match self.entries.get_mut(&key) {
            Some((_, existing_value)) => {
                *existing_value = Bytes::copy_from_slice(value);
            }
            None => {
                self.entries.insert(
                    key,
                    (Bytes::copy_from_slice(name), Bytes::copy_from_slice(value)),
                );
            }
        }
    }

    pub fn get(&self, lowercase_name: &str) -> Option<&Bytes> {
        self.entries
            .get(lowercase_name.as_bytes())
            .map(|(_, v)| v)
    }

    pub fn get_pair(&self, lowercase_name: &str) -> Option<(&Bytes, &Bytes)> {
        self.entries
            .get(lowercase_name.as_bytes())
            .map(|(n, v)| (n, v))
    }

    pub fn contains(&self, lowercase_name: &str) -> bool {
        self.entries.contains_key(lowercase_name.as_bytes())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &(Bytes, Bytes))> {
        self.entries.iter()
    }
}

/// Header value is a byte sequence; comparisons are case-insensitive and
/// tolerate surrounding OWS, mirroring `original_source`'s `is_chunked`.
pub fn token_eq_ignore_case(value: &[u8], token: &[u8]) -> bool {
    trim_ows(value).eq_ignore_ascii_case(token)
}

pub fn is_chunked(value: &[u8]) -> bool {
    // Transfer-Encoding may list multiple codings; chunked must be the last one.
    trim_ows(value)
        .rsplit(|&b| b == b',')
        .next()
        .is_some_and(|last| token_eq_ignore_case(last, b"chunked"))
}

pub fn is_close(value: &[u8]) -> bool {
    token_eq_ignore_case(value, b"close")
}

pub fn trim_ows(value: &[u8]) -> &[u8] {
    let is_ows = |b: &u8| matches!(b, b' ' | b'\t' | b'\r' | b'\n');
    let start = value.iter().position(|b| !is_ows(b)).unwrap_or(value.len());
    let end = value.iter().rposition(|b| !is_ows(b)).map_or(start, |i| i + 1);
    &value[start..end]
}
