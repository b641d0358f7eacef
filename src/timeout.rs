//! Timeout Manager — spec.md §4.H.
//!
//! One periodic timer fd per worker; on each tick the worker walks its
//! connection map and expires anything idle past the configured
//! timeout, but only while `READING` or `KEEPALIVE` (never mid-response).

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::connection::Connection;
use crate::multiplex::wakeup::TimerFd;

/// Tick period, chosen within spec.md §4.H's allowed `[0.5s, 2s]` band.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Owns the timer fd a [`crate::worker::Worker`] registers in its loop.
#[derive(Debug)]
pub struct TimeoutManager {
    timer: TimerFd,
}

impl TimeoutManager {
    /// Starts a timer firing every [`DEFAULT_TICK`].
    pub fn create() -> io::Result<Self> {
        Ok(Self {
            timer: TimerFd::create(DEFAULT_TICK)?,
        })
    }

    /// The timer's read half, for registration with a
    /// [`crate::multiplex::Loop`].
    pub fn timer_mut(&mut self) -> &mut TimerFd {
        &mut self.timer
    }
}

/// Walks `connections`, expiring any past `timeout` per the
/// `READING`/`KEEPALIVE`-only rule, and returns the fds of connections
/// that just expired so the caller can tear them down.
pub fn sweep(connections: &mut HashMap<RawFd, Connection>, timeout: Duration) -> Vec<RawFd> {
    connections
        .iter_mut()
        .filter_map(|(fd, conn)| conn.expire_if_idle(timeout).then_some(*fd))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use mio::net::TcpStream;
    use std::net::TcpListener as StdTcpListener;

    fn idle_connection() -> (RawFd, Connection) {
        use std::io::Write;
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        use std::os::unix::io::AsRawFd;
        let stream = TcpStream::from_std(server);
        let fd = stream.as_raw_fd();
        let mut conn = Connection::new(stream);

        // Send an incomplete request line so the connection lands in
        // READING (not RESPONDING, which sweep must never expire).
        client.write_all(b"GET / HTTP/1.1\r\n").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        conn.on_readable(&crate::response::EchoHandler, 100, 1 << 20)
            .ok();
        (fd, conn)
    }

    #[test]
    fn sweep_only_expires_past_timeout() {
        let (fd, conn) = idle_connection();
        let mut map = HashMap::new();
        map.insert(fd, conn);

        assert!(sweep(&mut map, Duration::from_secs(3600)).is_empty());
        let expired = sweep(&mut map, Duration::from_secs(0));
        assert_eq!(vec![fd], expired);
    }
}
