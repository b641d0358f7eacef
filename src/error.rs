//! Error types for the engine.
//!
//! Mirrors the propagation policy of spec.md §7: transient errors never
//! escape their handler, per-connection errors are confined to one
//! [`crate::connection::Connection`], and only multiplexer/startup
//! failures propagate out of a worker.

use std::io;

use thiserror::Error;

/// Errors that can terminate a worker or abort startup.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A listening socket could not be bound.
    #[error("failed to bind listener on {addr}: {source}")]
    BindFailed {
        /// Address that failed to bind.
        addr: std::net::SocketAddr,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The process fd limit could not be raised to the configured value.
    #[error("failed to raise fd limit to {requested}: {source}")]
    FdLimitFailed {
        /// Requested fd limit.
        requested: u64,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The readiness multiplexer reported a fatal (non-recoverable) error.
    #[error("event multiplexer failure: {0}")]
    MultiplexerFailure(#[source] io::Error),

    /// A worker's signal channel disconnected unexpectedly.
    #[error("worker signal channel disconnected")]
    SignalChannelClosed,
}

/// Reason a [`crate::connection::Connection`] transitioned to `CLOSING`.
///
/// Corresponds to spec.md §3's `close_now` concept and §7's per-connection
/// error surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer performed an orderly shutdown or a read returned 0.
    SocketClosed,
    /// A hard I/O error occurred on the socket.
    Error,
    /// The connection exceeded its configured idle timeout.
    Timeout,
    /// The request could not be parsed; a synthetic error response was
    /// already queued.
    ParseError,
    /// `max_keepalive_requests` was exhausted and the final response has
    /// been sent with `Connection: close`.
    KeepAliveExhausted,
    /// The server is shutting down (`FREE_ALL`).
    Shutdown,
}

/// Per-connection error: always confined to the connection that raised
/// it, never propagated past the worker's event dispatch.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O failure while reading or writing the socket.
    #[error("connection io error: {0}")]
    Io(#[from] io::Error),

    /// The request could not be parsed.
    #[error("request parse error: {0}")]
    Parse(#[from] crate::parser::ParseError),
}
