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

//! H1 parser implementation

use super::raw_request::RawRequest;
use super::{ParseError, ParseResult};

pub mod request;
pub mod response;
pub mod tokens;

/// A single parsed header as a borrowed name/value pair into the
/// original request buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'buf> {
    /// Field name, exactly as it appeared on the wire (not lowercased).
    pub name: &'buf str,
    /// Field value with leading/trailing optional whitespace trimmed.
    pub value: &'buf str,
}

/// Consumes whitespace characters from `buf`.
/// Whitespace is defined by RFC 9110 Secion 5.6.3 by ABNF
/// ```abnf
/// OWS = *( SP / HTAB )
/// ```
#[inline]
pub fn discard_whitespace(buf: &mut RawRequest<'_>) {
    buf.take_until(|b| b != b' ' && b != b'\t');
}

/// Consumes whitespace characters from `buf`. Requires that at least one whitespace character is
/// encountered.
/// Whitespace is defined by RFC 9110 Secion 5.6.3 by ABNF
/// ```abnf
/// RWS = 1*( SP / HTAB )
/// ```
#[inline]
pub fn discard_required_whitespace(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    let pos = buf.pos();

    buf.take_until(|b| b != b' ' && b != b'\t');
    if pos == buf.pos() {
        return Err(ParseError::Whitespace);
    }

    Ok(())
}

/// Consumes `buf` to the end of a new-line character sequence `b"\r\n"`
#[inline]
pub fn discard_newline(buf: &mut RawRequest<'_>) {
    loop {
        buf.take_until(|b| b == b'\r');
        buf.next();
        if buf.next() == Some(&b'\n') {
            buf.slice();
            return;
        }
    }
}

/// Consumes exactly one new-line sequence `b"\r\n"`, failing if the next
/// two bytes are anything else.
#[inline]
pub fn expect_newline(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    match (buf.next(), buf.next()) {
        (Some(b'\r'), Some(b'\n')) => {
            buf.slice();
            Ok(())
        }
        _ => Err(ParseError::NewLine),
    }
}
