//! Engine-level request model — spec.md §3's `session_request`.
//!
//! Unlike [`crate::parser::h1::request::H1Request`], which borrows
//! zero-copy from a single contiguous buffer, a `Request` here owns its
//! fields: a connection's read buffer is reused and shifted as soon as a
//! request is consumed (see [`crate::buffer::BodyAccumulator::advance`]),
//! so nothing may keep borrowing it past the call that parsed it.

use crate::parser::h1::request::H1Request;
use crate::parser::h1::Header;
use crate::parser::{Method, ParseError, Version};

/// Maximum number of headers a single request may carry before parsing
/// fails with [`ParseError::TooManyHeaders`].
pub const MAX_HEADERS: usize = 64;

/// A fully parsed, owned HTTP/1.1 request.
#[derive(Debug)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Request target as received on the wire (origin-form in the
    /// common case).
    pub uri_raw: String,
    /// Percent-decoded form of `uri_raw`.
    pub uri_decoded: String,
    /// Declared protocol version.
    pub protocol: Version,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Parsed `Content-Length`, or 0 if absent.
    pub content_length: u64,
    /// Request body, exactly `content_length` bytes.
    pub body: Vec<u8>,
    /// Whether the client asked for the connection to close after this
    /// response (`Connection: close`, or HTTP/1.0 without
    /// `Connection: keep-alive`).
    pub close_now: bool,
}

impl Request {
    /// Case-insensitive header lookup; returns the first match in wire
    /// order.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of attempting to parse one request out of a connection's
/// accumulated read buffer.
pub enum ParseOutcome {
    /// The header block (or, once known, the body) is not fully
    /// buffered yet; call again once more bytes have arrived.
    Incomplete,
    /// A full request was parsed. `consumed` is the number of leading
    /// bytes of the input buffer it occupied; the caller must advance
    /// its buffer by that amount before parsing again (pipelining).
    Complete { request: Request, consumed: usize },
    /// The header block was fully buffered but malformed.
    Error(ParseError),
}

/// Attempts to parse one complete request from the front of `buf`.
///
/// A request is only attempted once the header terminator `\r\n\r\n` is
/// present, matching spec.md §4.D's promotion rule; until then the
/// parser cannot distinguish "malformed" from "not here yet" for a
/// zero-copy scanner that stops at the first offending byte, so we defer
/// judgment rather than guess.
pub fn try_parse(buf: &[u8]) -> ParseOutcome {
    let Some(header_end) = find_header_terminator(buf) else {
        return ParseOutcome::Incomplete;
    };

    let head = &buf[..header_end];
    let mut header_storage = [Header { name: "", value: "" }; MAX_HEADERS];
    let mut h1 = H1Request::new();
    if let Err(e) = h1.parse(head, &mut header_storage) {
        return ParseOutcome::Error(e);
    }

    let method = h1.method.expect("parse succeeded without a method");
    let protocol = h1.version.expect("parse succeeded without a version");
    let uri_raw = h1.target.expect("parse succeeded without a target").to_string();
    let uri_decoded = percent_decode(&uri_raw);

    let headers: Vec<(String, String)> = h1
        .headers
        .map(|hs| {
            hs.iter()
                .map(|h| (h.name.to_string(), h.value.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let content_length = match headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
    {
        Some((_, v)) => match v.trim().parse::<u64>() {
            Ok(n) => n,
            Err(_) => return ParseOutcome::Error(ParseError::ContentLength),
        },
        None => 0,
    };

    let total_needed = header_end + content_length as usize;
    if buf.len() < total_needed {
        return ParseOutcome::Incomplete;
    }

    let body = buf[header_end..total_needed].to_vec();
    let close_now = connection_close(&headers, protocol);

    ParseOutcome::Complete {
        request: Request {
            method,
            uri_raw,
            uri_decoded,
            protocol,
            headers,
            content_length,
            body,
            close_now,
        },
        consumed: total_needed,
    }
}

fn connection_close(headers: &[(String, String)], protocol: Version) -> bool {
    let connection = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("connection"))
        .map(|(_, v)| v.as_str());

    match connection {
        Some(v) if v.eq_ignore_ascii_case("close") => true,
        Some(v) if v.eq_ignore_ascii_case("keep-alive") => false,
        _ => matches!(protocol, Version::H1_0),
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Minimal percent-decoder for the request target, per RFC 3986 §2.1.
/// Malformed escapes are passed through verbatim rather than rejected;
/// the core's job is I/O and framing, not strict URI validation.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn incomplete_without_header_terminator() {
        assert!(matches!(try_parse(b"GET / HTTP/1.1\r\n"), ParseOutcome::Incomplete));
    }

    #[test]
    fn complete_simple_get() {
        let wire = b"GET /a?b=c HTTP/1.1\r\nHost: x\r\n\r\n";
        match try_parse(wire) {
            ParseOutcome::Complete { request, consumed } => {
                assert_eq!(Method::Get, request.method);
                assert_eq!("/a?b=c", request.uri_raw);
                assert_eq!(wire.len(), consumed);
                assert!(!request.close_now);
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn waits_for_full_body_before_completing() {
        let head = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        let mut buf = head.to_vec();
        buf.extend_from_slice(b"ab");
        assert!(matches!(try_parse(&buf), ParseOutcome::Incomplete));

        buf.extend_from_slice(b"cde");
        match try_parse(&buf) {
            ParseOutcome::Complete { request, consumed } => {
                assert_eq!(b"abcde", request.body.as_slice());
                assert_eq!(consumed, buf.len());
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn http_1_0_without_keepalive_header_closes() {
        match try_parse(b"GET / HTTP/1.0\r\n\r\n") {
            ParseOutcome::Complete { request, .. } => assert!(request.close_now),
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn explicit_connection_close_is_honored() {
        match try_parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n") {
            ParseOutcome::Complete { request, .. } => assert!(request.close_now),
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn percent_decode_handles_simple_escapes() {
        assert_eq!("/a b", percent_decode("/a%20b"));
        assert_eq!("/%zz", percent_decode("/%zz"));
    }
}
