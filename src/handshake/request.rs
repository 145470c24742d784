//! Upgrade request parsing and header validation.
//!
//! Required headers are described by [`HEADER_RULES`], a table of
//! `(name, required, predicate)` entries evaluated uniformly after the
//! request line and header syntax have been checked.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Blank line ending the request head.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Request line plus the minimum number of header lines.
const MIN_REQUEST_LINES: usize = 4;

/// Only accepted request method.
const METHOD_GET: &str = "GET";

/// Only accepted protocol version.
const HTTP_1_1: &str = "HTTP/1.1";

// ============================================================================
// Header Rules
// ============================================================================

/// Validation entry for one request header.
#[derive(Debug, Clone, Copy)]
pub struct HeaderRule {
    /// Lower-cased header name.
    pub name: &'static str,
    /// Whether absence fails the handshake.
    pub required: bool,
    /// Expectation reported in [`Error::MissingOrInvalidHeader`].
    pub expected: &'static str,
    /// Check applied to the trimmed (and joined) header value.
    pub predicate: fn(&str) -> bool,
}

/// Headers checked on every upgrade request, in evaluation order.
///
/// `connection` is presence-only: its value is not required to contain
/// `upgrade`.
pub const HEADER_RULES: &[HeaderRule] = &[
    HeaderRule {
        name: "upgrade",
        required: true,
        expected: "'websocket'",
        predicate: is_websocket,
    },
    HeaderRule {
        name: "sec-websocket-version",
        required: true,
        expected: "'13'",
        predicate: is_version_13,
    },
    HeaderRule {
        name: "sec-websocket-key",
        required: true,
        expected: "a value",
        predicate: any_value,
    },
    HeaderRule {
        name: "connection",
        required: true,
        expected: "a value",
        predicate: any_value,
    },
    HeaderRule {
        name: "sec-websocket-protocol",
        required: false,
        expected: "a value",
        predicate: any_value,
    },
];

fn is_websocket(value: &str) -> bool {
    value.eq_ignore_ascii_case("websocket")
}

fn is_version_13(value: &str) -> bool {
    value == "13"
}

fn any_value(_: &str) -> bool {
    true
}

// ============================================================================
// HandshakeRequest
// ============================================================================

/// A validated WebSocket upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    target: String,
    headers: FxHashMap<String, String>,
    key: String,
    protocols: Vec<String>,
}

impl HandshakeRequest {
    /// Parses and validates a complete request head.
    ///
    /// `raw` may include the trailing `\r\n\r\n`. Each byte is read as one
    /// Latin-1 character, so obs-text in unrelated headers is tolerated.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedRequest`] for bad request line or header syntax
    /// - [`Error::MissingOrInvalidHeader`] when a [`HEADER_RULES`] entry fails
    ///   or a required header value is not ASCII
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text: String = raw.iter().copied().map(char::from).collect();
        let text = text.strip_suffix("\r\n\r\n").unwrap_or(&text);

        let lines: Vec<&str> = text.split("\r\n").collect();
        if lines.len() < MIN_REQUEST_LINES {
            return Err(Error::malformed_request(format!(
                "expected at least {MIN_REQUEST_LINES} lines, got {}",
                lines.len()
            )));
        }

        let target = parse_request_line(lines[0])?;
        let headers = parse_headers(&lines[1..])?;
        validate_headers(&headers)?;

        let key = headers
            .get("sec-websocket-key")
            .cloned()
            .ok_or_else(|| Error::missing_header("sec-websocket-key", "a value"))?;

        let protocols = headers
            .get("sec-websocket-protocol")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            target: target.to_string(),
            headers,
            key,
            protocols,
        })
    }

    /// Request target (path and query).
    #[inline]
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The client's `Sec-WebSocket-Key` nonce.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Subprotocols listed in `Sec-WebSocket-Protocol`, in client order.
    #[inline]
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Looks up a header by name, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Returns the offset just past the first header terminator at or after `from`.
#[must_use]
pub fn find_terminator(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| from + pos + HEADER_TERMINATOR.len())
}

fn parse_request_line(line: &str) -> Result<&str> {
    let parts: Vec<&str> = line.split(' ').filter(|t| !t.is_empty()).collect();
    if parts.len() < 2 {
        return Err(Error::malformed_request(format!(
            "invalid request line '{line}'"
        )));
    }
    if parts[0] != METHOD_GET {
        return Err(Error::malformed_request(format!(
            "unsupported method '{}'",
            parts[0]
        )));
    }
    if let Some(version) = parts.get(2)
        && *version != HTTP_1_1
    {
        return Err(Error::malformed_request(format!(
            "unsupported version '{version}'"
        )));
    }
    Ok(parts[1])
}

fn parse_headers(lines: &[&str]) -> Result<FxHashMap<String, String>> {
    let mut headers: FxHashMap<String, String> = FxHashMap::default();

    for line in lines {
        let (name, value) = line
            .split_once(':')
            .filter(|(name, value)| !name.is_empty() && !value.is_empty())
            .ok_or_else(|| Error::malformed_request(format!("invalid header '{line}'")))?;

        let value = value.trim();
        headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    Ok(headers)
}

fn validate_headers(headers: &FxHashMap<String, String>) -> Result<()> {
    for rule in HEADER_RULES {
        match headers.get(rule.name) {
            None if rule.required => {
                return Err(Error::missing_header(rule.name, rule.expected));
            }
            Some(value) if !(rule.predicate)(value) || (rule.required && !value.is_ascii()) => {
                return Err(Error::missing_header(rule.name, rule.expected));
            }
            _ => {}
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
