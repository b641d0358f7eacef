//! Response generation collaborator — spec.md §6's "plugin hooks"
//! interface, re-expressed as a single trait per the design note in §9
//! for the Stream callback quartet (one polymorphic capability instead
//! of raw function pointers). Routing, virtual hosts, and the static
//! file access layer are explicitly out of scope (spec.md §1); this
//! trait is the seam a caller plugs a real application into.

use crate::parser::h1::response::Response;
use crate::parser::{Status, Version};
use crate::request::Request;

/// Produces a response for a parsed request. Implementations must not
/// block: they run inline on the worker thread that owns the
/// connection (spec.md §5's "Connections never suspend" invariant).
pub trait RequestHandler: Send + Sync {
    /// Builds the response for `request`.
    fn handle(&self, request: &Request) -> Response;
}

/// Default handler used when no application-specific routing is wired
/// in: echoes the request line back as a 200 OK. Exercises the full
/// Connection → Channel → socket path end to end without requiring a
/// real application.
#[derive(Debug, Default)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, request: &Request) -> Response {
        let body = format!("{} {}\n", request.method, request.uri_raw);
        Response::new(request.protocol, Status::Ok)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.into_bytes())
    }
}

/// Builds the synthetic error response queued when request ingestion
/// fails (spec.md §4.D "Errors produce a response").
pub fn error_response(version: Version, status: Status) -> Response {
    Response::error(version, status)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::request::try_parse;
    use crate::request::ParseOutcome;

    #[test]
    fn echo_handler_reports_method_and_target() {
        let request = match try_parse(b"GET /x HTTP/1.1\r\n\r\n") {
            ParseOutcome::Complete { request, .. } => request,
            _ => panic!("expected Complete"),
        };
        let resp = EchoHandler.handle(&request);
        assert!(String::from_utf8(resp.body().to_vec())
            .unwrap()
            .contains("GET /x"));
    }
}
