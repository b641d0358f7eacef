// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP/1.1 request-line and header parsing.

use core::str::from_utf8_unchecked;

use super::tokens::{is_header_name_token, is_header_value_token, is_request_target_token};
use super::{discard_whitespace, expect_newline, Header};
use crate::parser::raw_request::RawRequest;
use crate::parser::{Method, ParseError, ParseResult, Version};

/// A parsed HTTP/1.1 request line and header block. Zero-copy: every
/// field borrows from the buffer passed to [`H1Request::parse`], which
/// must therefore outlive the connection's use of this value. The
/// engine-level request the worker holds across multiple non-blocking
/// reads owns its bytes separately and re-parses once the header block
/// is known to be complete; see `crate::request`.
#[derive(Debug, Default)]
pub struct H1Request<'buf, 'headers> {
    /// Request method.
    pub method: Option<Method>,
    /// Request target, as the raw bytes between the two request-line
    /// spaces (origin-form path+query in the common case).
    pub target: Option<&'buf str>,
    /// Declared protocol version.
    pub version: Option<Version>,
    /// Parsed headers, in wire order, filled into the caller-supplied
    /// storage passed to `parse`.
    pub headers: Option<&'headers mut [Header<'buf>]>,
}

impl<'b, 'h> H1Request<'b, 'h> {
    /// Creates an empty, unparsed request.
    pub fn new() -> Self {
        H1Request {
            method: None,
            target: None,
            version: None,
            headers: None,
        }
    }

    /// Parses a request line and header block out of `buf`, filling at
    /// most `headers.len()` headers into `headers`.
    ///
    /// # Example
    /// ```
    /// # use monkeyd::parser::{Method, Version};
    /// # use monkeyd::parser::ParseError;
    /// # use monkeyd::parser::h1::request::H1Request;
    /// # use monkeyd::parser::h1::Header;
    /// # fn main() -> Result<(), ParseError> {
    /// let mut headers = [Header { name: "", value: "" }; 16];
    /// let mut req = H1Request::new();
    /// req.parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", &mut headers)?;
    /// assert_eq!(Some(Method::Get), req.method);
    /// assert_eq!(Some("/"), req.target);
    /// assert_eq!(Some(Version::H1_1), req.version);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&mut self, buf: &'b [u8], headers: &'h mut [Header<'b>]) -> ParseResult<()> {
        let mut req = RawRequest::new(buf);
        self.set_method(&mut req)?;
        self.set_target(&mut req)?;
        self.set_version(&mut req)?;
        expect_newline(&mut req)?;
        let n = Self::parse_headers(&mut req, headers)?;
        self.headers = Some(&mut headers[..n]);

        Ok(())
    }

    fn set_method(&mut self, buf: &mut RawRequest<'b>) -> ParseResult<()> {
        if buf.any(|&b| !b.is_ascii_uppercase()) {
            if let Ok(slice) = buf.slice_skip(1) {
                let res = match slice {
                    b"GET" => Ok(Method::Get),
                    b"HEAD" => Ok(Method::Head),
                    b"POST" => Ok(Method::Post),
                    b"PUT" => Ok(Method::Put),
                    b"DELETE" => Ok(Method::Delete),
                    b"CONNECT" => Ok(Method::Connect),
                    b"OPTIONS" => Ok(Method::Options),
                    b"TRACE" => Ok(Method::Trace),
                    _ => Err(ParseError::Method),
                }?;

                self.method = Some(res);
                return Ok(());
            }
        }

        Err(ParseError::Method)
    }

    fn set_target(&mut self, buf: &mut RawRequest<'b>) -> ParseResult<()> {
        for &b in &mut *buf {
            if b == b' ' {
                if let Ok(slice) = buf.slice_skip(1) {
                    // SAFETY: every byte accepted by is_request_target_token is
                    // ASCII, so the slice is valid UTF-8.
                    self.target = Some(unsafe { from_utf8_unchecked(slice) });
                    return Ok(());
                }

                break;
            } else if !is_request_target_token(b) {
                break;
            }
        }

        Err(ParseError::Target)
    }

    fn set_version(&mut self, buf: &mut RawRequest<'b>) -> ParseResult<()> {
        let result = if !buf.take(5).eq(b"HTTP/".iter()) {
            Err(ParseError::Version)
        } else {
            match buf.next() {
                Some(b'1') => {
                    if buf.next() == Some(&b'.') {
                        match buf.next() {
                            Some(b'0') => Ok(Version::H1_0),
                            Some(b'1') => Ok(Version::H1_1),
                            _ => Err(ParseError::Version),
                        }
                    } else {
                        Err(ParseError::Version)
                    }
                }
                Some(b'2') => Ok(Version::H2),
                Some(b'3') => Ok(Version::H3),
                _ => Err(ParseError::Version),
            }
        };

        buf.slice();

        match result {
            Ok(version) => {
                self.version = Some(version);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Parses `field-name ":" OWS field-value OWS CRLF` pairs until an
    /// empty line terminates the header block, per RFC 9112 §5.
    fn parse_headers(
        buf: &mut RawRequest<'b>,
        headers: &'h mut [Header<'b>],
    ) -> ParseResult<usize> {
        let mut count = 0;

        loop {
            if buf.peek() == Some(b'\r') {
                expect_newline(buf)?;
                return Ok(count);
            }

            if count >= headers.len() {
                return Err(ParseError::TooManyHeaders);
            }

            let name = Self::parse_header_name(buf)?;
            discard_whitespace(buf);
            buf.slice();
            let value = Self::parse_header_value(buf)?;

            headers[count] = Header { name, value };
            count += 1;
        }
    }

    fn parse_header_name(buf: &mut RawRequest<'b>) -> ParseResult<&'b str> {
        for &b in &mut *buf {
            if b == b':' {
                if let Ok(slice) = buf.slice_skip(1) {
                    if slice.is_empty() {
                        break;
                    }
                    // SAFETY: is_header_name_token only accepts ASCII tchar bytes.
                    return Ok(unsafe { from_utf8_unchecked(slice) });
                }
                break;
            } else if !is_header_name_token(b) {
                break;
            }
        }

        Err(ParseError::HeaderName)
    }

    fn parse_header_value(buf: &mut RawRequest<'b>) -> ParseResult<&'b str> {
        for &b in &mut *buf {
            if b == b'\r' {
                if let Ok(slice) = buf.slice_skip(1) {
                    expect_newline_after_cr(buf)?;
                    // SAFETY: is_header_value_token accepts VCHAR, obs-text,
                    // space and tab, all valid in a Rust &str when the
                    // surrounding bytes were themselves already UTF-8 (obs-text
                    // bytes are preserved verbatim as >= 0x80 continuation-free
                    // bytes here, matching the teacher's existing unchecked
                    // conversions elsewhere in this parser).
                    let value = unsafe { from_utf8_unchecked(slice) };
                    return Ok(value.trim_matches(|c| c == ' ' || c == '\t'));
                }
                break;
            } else if !is_header_value_token(b) {
                break;
            }
        }

        Err(ParseError::HeaderValue)
    }
}

/// `parse_header_value` already consumed the `\r`; this consumes the
/// paired `\n` without re-slicing (the value slice was already taken).
fn expect_newline_after_cr(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    match buf.next() {
        Some(b'\n') => {
            buf.slice();
            Ok(())
        }
        _ => Err(ParseError::NewLine),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let mut headers = [Header { name: "", value: "" }; 4];
        let mut req = H1Request::new();
        req.parse(b"GET / HTTP/1.1\r\n\r\n", &mut headers).unwrap();
        assert_eq!(Some(Method::Get), req.method);
        assert_eq!(Some("/"), req.target);
        assert_eq!(Some(Version::H1_1), req.version);
        assert_eq!(0, req.headers.unwrap().len());
    }

    #[test]
    fn parses_headers_in_order() {
        let mut headers = [Header { name: "", value: "" }; 4];
        let mut req = H1Request::new();
        req.parse(
            b"GET /x HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n",
            &mut headers,
        )
        .unwrap();

        let parsed = req.headers.unwrap();
        assert_eq!(2, parsed.len());
        assert_eq!("Host", parsed[0].name);
        assert_eq!("example.com", parsed[0].value);
        assert_eq!("Accept", parsed[1].name);
        assert_eq!("*/*", parsed[1].value);
    }

    #[test]
    fn too_many_headers_is_an_error() {
        let mut headers = [Header { name: "", value: "" }; 1];
        let mut req = H1Request::new();
        let result = req.parse(
            b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n",
            &mut headers,
        );
        assert_eq!(Err(ParseError::TooManyHeaders), result);
    }

    #[test]
    fn header_value_is_trimmed_of_optional_whitespace() {
        let mut headers = [Header { name: "", value: "" }; 4];
        let mut req = H1Request::new();
        req.parse(b"GET / HTTP/1.1\r\nX:   hi there  \r\n\r\n", &mut headers)
            .unwrap();
        assert_eq!("hi there", req.headers.unwrap()[0].value);
    }

    #[test]
    fn rejects_invalid_method() {
        let mut headers = [Header { name: "", value: "" }; 1];
        let mut req = H1Request::new();
        assert_eq!(
            Err(ParseError::Method),
            req.parse(b"g3t / HTTP/1.1\r\n\r\n", &mut headers)
        );
    }
}
