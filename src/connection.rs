//! Connection state machine — spec.md §3 `client_session` / §4.D.

use std::io::{self, Read};
use std::time::{Duration, Instant};

use mio::net::TcpStream;

use crate::buffer::BodyAccumulator;
use crate::channel::{Channel, ChannelStatus, Stream};
use crate::error::{CloseReason, ConnectionError};
use crate::parser::{Status, Version};
use crate::request::{self, ParseOutcome};
use crate::response::RequestHandler;

/// One read syscall's scratch buffer size. Kept off the `Connection`
/// struct itself; it never needs to persist between calls.
const READ_CHUNK: usize = 16 * 1024;

/// Connection lifecycle state, per spec.md §4.D's state diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Accepted, not yet readable.
    New,
    /// Accumulating and parsing inbound bytes.
    Reading,
    /// A request was parsed and is being handed to the response handler.
    Processing,
    /// A response is queued on the channel and being drained.
    Responding,
    /// Between requests on a connection that will be reused.
    KeepAlive,
    /// Tearing down; the owning worker should deregister and drop this
    /// connection once observed.
    Closing,
}

/// A single accepted client connection: owns its socket, read buffer,
/// and outbound [`Channel`]. Mutated only by the worker thread that
/// accepted it (spec.md §5's ownership invariant).
#[derive(Debug)]
pub struct Connection {
    socket: TcpStream,
    status: ConnectionStatus,
    read_buf: BodyAccumulator,
    channel: Channel,
    init_time: Instant,
    last_activity: Instant,
    counter_connections: u32,
    pending_close: bool,
    close_reason: Option<CloseReason>,
}

impl Connection {
    /// Wraps a freshly accepted socket.
    pub fn new(socket: TcpStream) -> Self {
        let now = Instant::now();
        Self {
            socket,
            status: ConnectionStatus::New,
            read_buf: BodyAccumulator::new(),
            channel: Channel::new(),
            init_time: now,
            last_activity: now,
            counter_connections: 0,
            pending_close: false,
            close_reason: None,
        }
    }

    /// Current state machine status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Why this connection transitioned to [`ConnectionStatus::Closing`],
    /// once known.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// The underlying socket, for (de)registration with a
    /// [`crate::multiplex::Loop`].
    pub fn socket_mut(&mut self) -> &mut TcpStream {
        &mut self.socket
    }

    /// Whether the channel has pending output, i.e. `WRITE` interest
    /// should be armed.
    pub fn wants_write(&self) -> bool {
        self.channel.is_enabled()
    }

    /// Time since the last read or write activity on this connection.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Time since this connection was accepted.
    pub fn age(&self) -> Duration {
        self.init_time.elapsed()
    }

    /// Number of requests served so far.
    pub fn requests_served(&self) -> u32 {
        self.counter_connections
    }

    fn close(&mut self, reason: CloseReason) {
        self.status = ConnectionStatus::Closing;
        self.close_reason = Some(reason);
    }

    /// Drains the socket, accumulates bytes, and parses as many complete
    /// requests as are available, queuing a response for each in arrival
    /// order (pipelining). Returns once the socket would block.
    pub fn on_readable(
        &mut self,
        handler: &dyn RequestHandler,
        max_keepalive_requests: u32,
        max_body_bytes: u64,
    ) -> Result<(), ConnectionError> {
        if matches!(self.status, ConnectionStatus::New | ConnectionStatus::KeepAlive) {
            self.status = ConnectionStatus::Reading;
        }
        self.last_activity = Instant::now();

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.socket.read(&mut chunk) {
                Ok(0) => {
                    self.close(CloseReason::SocketClosed);
                    return Ok(());
                }
                Ok(n) => {
                    self.read_buf.extend(&chunk[..n]);
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.close(CloseReason::Error);
                    return Err(ConnectionError::Io(e));
                }
            }
        }

        if self.read_buf.len() as u64 > max_body_bytes {
            self.queue_response(
                crate::response::error_response(Version::H1_1, Status::ContentTooLarge),
                true,
            );
            self.read_buf.clear();
            self.status = ConnectionStatus::Responding;
            return Ok(());
        }

        loop {
            match request::try_parse(self.read_buf.as_slice()) {
                ParseOutcome::Incomplete => break,
                ParseOutcome::Error(e) => {
                    self.read_buf.clear();
                    self.queue_response(
                        crate::response::error_response(Version::H1_1, e.status()),
                        true,
                    );
                    break;
                }
                ParseOutcome::Complete { request, consumed } => {
                    self.read_buf.advance(consumed);
                    self.counter_connections += 1;
                    self.status = ConnectionStatus::Processing;

                    let exhausted = self.counter_connections >= max_keepalive_requests;
                    let force_close = request.close_now || exhausted;
                    let response = handler.handle(&request).with_header(
                        "Connection",
                        if force_close { "close" } else { "keep-alive" },
                    );
                    self.queue_response(response, force_close);
                }
            }
        }

        if self.channel.is_enabled() {
            self.status = ConnectionStatus::Responding;
        }
        Ok(())
    }

    fn queue_response(
        &mut self,
        response: crate::parser::h1::response::Response,
        force_close: bool,
    ) {
        let (head, body) = response.into_parts();
        self.channel.append(Stream::Raw { buf: head, offset: 0 });
        if !body.is_empty() {
            self.channel.append(Stream::Raw { buf: body, offset: 0 });
        }
        if force_close {
            self.pending_close = true;
        }
    }

    /// Drains the outbound channel. On `DONE`, transitions to
    /// `KeepAlive` (ready for another request) or `Closing` depending on
    /// whether a queued response asked for `Connection: close`.
    pub fn on_writable(&mut self) -> Result<(), ConnectionError> {
        self.last_activity = Instant::now();

        match self.channel.write(&mut self.socket) {
            ChannelStatus::Done => {
                if self.pending_close {
                    self.close(CloseReason::KeepAliveExhausted);
                } else {
                    self.status = ConnectionStatus::KeepAlive;
                }
            }
            ChannelStatus::Flush => {
                self.status = ConnectionStatus::Responding;
            }
            ChannelStatus::Empty => {}
            ChannelStatus::Error => {
                self.close(CloseReason::Error);
            }
        }
        Ok(())
    }

    /// Marks this connection closing on a multiplexer-synthesized
    /// `CLOSE` event.
    pub fn on_close_event(&mut self) {
        if !matches!(self.status, ConnectionStatus::Closing) {
            self.close(CloseReason::SocketClosed);
        }
    }

    /// Applies the idle-timeout rule of spec.md §4.H: only `READING` and
    /// `KEEPALIVE` connections are subject to expiry, never one with a
    /// response in flight. Returns whether this connection just expired.
    pub fn expire_if_idle(&mut self, timeout: Duration) -> bool {
        let expirable = matches!(
            self.status,
            ConnectionStatus::Reading | ConnectionStatus::KeepAlive
        );
        if expirable && self.idle_for() > timeout {
            self.close(CloseReason::Timeout);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::response::EchoHandler;
    use std::net::TcpListener as StdTcpListener;

    fn connected_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn single_request_moves_to_responding_with_queued_bytes() {
        use std::io::Write;
        let (server, mut client) = connected_pair();
        let mut conn = Connection::new(server);
        client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        conn.on_readable(&EchoHandler, 100, 1 << 20).unwrap();
        assert_eq!(ConnectionStatus::Responding, conn.status());
        assert_eq!(1, conn.requests_served());
        assert!(conn.wants_write());
    }

    #[test]
    fn peer_close_transitions_to_closing() {
        let (server, client) = connected_pair();
        drop(client);
        std::thread::sleep(Duration::from_millis(20));
        let mut conn = Connection::new(server);
        conn.on_readable(&EchoHandler, 100, 1 << 20).unwrap();
        assert_eq!(ConnectionStatus::Closing, conn.status());
        assert_eq!(Some(CloseReason::SocketClosed), conn.close_reason());
    }

    #[test]
    fn idle_timeout_only_applies_while_reading_or_keepalive() {
        let (server, _client) = connected_pair();
        let mut conn = Connection::new(server);
        conn.status = ConnectionStatus::Responding;
        assert!(!conn.expire_if_idle(Duration::from_secs(0)));

        conn.status = ConnectionStatus::KeepAlive;
        assert!(conn.expire_if_idle(Duration::from_secs(0)));
        assert_eq!(ConnectionStatus::Closing, conn.status());
        assert_eq!(Some(CloseReason::Timeout), conn.close_reason());
    }

    #[test]
    fn malformed_request_queues_error_response_and_closes_after() {
        use std::io::Write;
        let (server, mut client) = connected_pair();
        let mut conn = Connection::new(server);
        client.write_all(b"bogus request line\r\n\r\n").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        conn.on_readable(&EchoHandler, 100, 1 << 20).unwrap();
        assert!(conn.wants_write());
        assert!(conn.pending_close);
    }
}
