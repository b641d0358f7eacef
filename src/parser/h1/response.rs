//! HTTP/1.1 response rendering.
//!
//! A response built here is server-generated, so unlike [`super::request::H1Request`]
//! it owns its bytes rather than borrowing from an input buffer.

use crate::parser::{Status, Version};

/// A status-line, header block, and body ready to hand to a
/// [`crate::channel::Channel`].
#[derive(Debug)]
pub struct Response {
    version: Version,
    status: Status,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    /// Starts a response with no headers and an empty body.
    pub fn new(version: Version, status: Status) -> Self {
        Self {
            version,
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Builds the default HTML error page for a status code, with
    /// `Content-Length` and `Connection` already set. Connections
    /// reporting an error via this path are not assumed keep-alive
    /// capable; callers that know otherwise should clear the header
    /// themselves.
    pub fn error(version: Version, status: Status) -> Self {
        let reason = status_reason(status);
        let body = format!(
            "<HTML><HEAD><STYLE type=\"text/css\"> body {{font-size: 12px;}} \
             </STYLE></HEAD><BODY><H1>{reason}</H1>{} {reason}<BR><HR>\
             <ADDRESS>Powered by monkeyd</ADDRESS></BODY></HTML>",
            status as u16,
        );
        Self::new(version, status)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(body.into_bytes())
    }

    /// Appends a header, preserving insertion order.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body, also fixing up `Content-Length`.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// The response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Renders the status line and header block, ending with the blank
    /// line separating headers from body. `Content-Length` is always
    /// appended last and derived from the current body, so callers never
    /// need to keep it in sync by hand.
    pub fn render_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.headers.len() * 32);
        out.extend_from_slice(self.version.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice((self.status as u16).to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(status_reason(self.status).as_bytes());
        out.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"Content-Length: ");
        out.extend_from_slice(self.body.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    /// Splits this response into the `(head, body)` byte buffers a
    /// [`crate::channel::Channel`] drains in order.
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        let head = self.render_head();
        (head, self.body)
    }
}

fn status_reason(status: Status) -> &'static str {
    use Status::*;
    match status {
        Continue => "Continue",
        SwitchingProtocols => "Switching Protocols",
        Ok => "OK",
        Created => "Created",
        Accepted => "Accepted",
        NonAuthoritativeInformation => "Non-Authoritative Information",
        NoContent => "No Content",
        ResetContent => "Reset Content",
        PartialContent => "Partial Content",
        MultipleChoices => "Multiple Choices",
        MovedPermanently => "Moved Permanently",
        Found => "Found",
        SeeOther => "See Other",
        NotModified => "Not Modified",
        UseProxy => "Use Proxy",
        TemporaryRedirect => "Temporary Redirect",
        PermanentRedirect => "Permanent Redirect",
        BadRequest => "Bad Request",
        Unauthorized => "Unauthorized",
        PaymentRequired => "Payment Required",
        Forbidden => "Forbidden",
        NotFound => "Not Found",
        MethodNotAllowed => "Method Not Allowed",
        NotAcceptable => "Not Acceptable",
        ProxyAuthenticationRequired => "Proxy Authentication Required",
        RequestTimeout => "Request Timeout",
        Conflict => "Conflict",
        Gone => "Gone",
        LengthRequired => "Length Required",
        PreconditionFailed => "Precondition Failed",
        ContentTooLarge => "Content Too Large",
        UriTooLong => "URI Too Long",
        UnsupportedMediaType => "Unsupported Media Type",
        RangeNotSatisfiable => "Range Not Satisfiable",
        ExpectationFailed => "Expectation Failed",
        MisdirectedRequest => "Misdirected Request",
        UnprocessableContent => "Unprocessable Content",
        UpgradeRequired => "Upgrade Required",
        InternalServerError => "Internal Server Error",
        NotImplemented => "Not Implemented",
        BadGateway => "Bad Gateway",
        ServiceUnavailable => "Service Unavailable",
        GatewayTimeout => "Gateway Timeout",
        HTTPVersionNotSupported => "HTTP Version Not Supported",
    }
}
