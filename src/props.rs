//! Ordered `key=value` property lines, the building block of file and tree
//! payloads.
//!
//! A rendered line looks like a URL query string with a restricted alphabet:
//! bytes in `[a-zA-Z0-9.,:_-]` pass through, everything else becomes `%xx`
//! with lowercase hex. Keys render in lexicographic order, so the same map
//! always produces the same bytes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("'{0}' is not a key=value pair")]
    NotAPair(String),
    #[error("got several values for key {0}, expected 1")]
    DuplicateKey(String),
    #[error("bad percent escape in '{0}'")]
    BadEscape(String),
    #[error("escapes don't decode to UTF-8 in '{0}'")]
    NotUtf8(String),
}

/// A string -> string map with deterministic, escaped text rendering.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            escape_into(&mut out, k);
            out.push('=');
            escape_into(&mut out, v);
        }
        out
    }

    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut props = Self::new();
        if line.is_empty() {
            return Ok(props);
        }
        for pair in line.split('&') {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| ParseError::NotAPair(pair.to_owned()))?;
            let k = unescape(k)?;
            let v = unescape(v)?;
            if props.0.insert(k.clone(), v).is_some() {
                return Err(ParseError::DuplicateKey(k));
            }
        }
        Ok(props)
    }
}

fn escape_into(out: &mut String, s: &str) {
    for &b in s.as_bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b',' | b':' | b'_' | b'-' => {
                out.push(b as char)
            }
            other => write!(out, "%{other:02x}").unwrap(),
        }
    }
}

fn unescape(s: &str) -> Result<String, ParseError> {
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        if b != b'%' {
            out.push(b);
            continue;
        }
        let hi = bytes.next();
        let lo = bytes.next();
        let (Some(hi), Some(lo)) = (hi, lo) else {
            return Err(ParseError::BadEscape(s.to_owned()));
        };
        let decode = |c: u8| (c as char).to_digit(16);
        match (decode(hi), decode(lo)) {
            (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as u8),
            _ => return Err(ParseError::BadEscape(s.to_owned())),
        }
    }
    String::from_utf8(out).map_err(|_| ParseError::NotUtf8(s.to_owned()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn escapes() {
        let cases = [
            ("", ""),
            ("foo:bar_BAZ-123", "foo:bar_BAZ-123"),
            ("foo=bar%baz%%=", "foo%3dbar%25baz%25%25%3d"),
        ];
        for (raw, escaped) in cases {
            let mut out = String::new();
            escape_into(&mut out, raw);
            assert_eq!(out, escaped);
            assert_eq!(unescape(escaped).unwrap(), raw);
        }
    }

    fn props(pairs: &[(&str, &str)]) -> Properties {
        let mut p = Properties::new();
        for (k, v) in pairs {
            p.insert(k, *v);
        }
        p
    }

    #[test]
    fn render_ordered() {
        assert_eq!(props(&[]).render(), "");
        assert_eq!(props(&[("foo", "bar")]).render(), "foo=bar");
        assert_eq!(
            props(&[("foo", "bar"), ("bar", "baz")]).render(),
            "bar=baz&foo=bar"
        );
        assert_eq!(
            props(&[("foo&bar", "%=baz"), ("?", "!")]).render(),
            "%3f=%21&foo%26bar=%25%3dbaz"
        );
    }

    #[test]
    fn parse_round_trip() {
        for p in [
            props(&[]),
            props(&[("foo", "bar")]),
            props(&[("foo", "bar"), ("bar", "baz")]),
            props(&[("foo&bar", "%=baz"), ("?", "!")]),
        ] {
            assert_eq!(Properties::parse(&p.render()).unwrap(), p);
        }
    }

    #[test]
    fn parse_rejects() {
        assert!(Properties::parse("foobar").is_err());
        assert!(Properties::parse("a=1&a=2").is_err());
        assert!(Properties::parse("a=%zz").is_err());
        assert!(Properties::parse("a=%2").is_err());
    }
}
