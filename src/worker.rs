//! Worker — spec.md §4.E.
//!
//! Owns one event loop, one signal channel, one timer fd, and its
//! connection map. Runs entirely on its own OS thread; the only values
//! it shares with the rest of the process are atomic counters and the
//! write half of its signal channel (spec.md §5's "no global locks on
//! the hot path").

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};

use crate::acceptor;
use crate::config::Config;
use crate::connection::{Connection, ConnectionStatus};
use crate::efdt::Efdt;
use crate::multiplex::{EventMask, Loop};
use crate::response::RequestHandler;
use crate::timeout::{self, TimeoutManager};

/// Opcodes ridden over a worker's signal channel — spec.md §6.
pub mod opcode {
    /// Begin accepting (REUSEPORT mode only).
    pub const START: u64 = 1;
    /// Publish a counter snapshot (currently a no-op trigger; counters
    /// are always current via atomics, this exists for the wire
    /// contract named in spec.md §6).
    pub const SYNC_COUNTERS: u64 = 2;
    /// Shut down the worker.
    pub const FREE_ALL: u64 = 3;
    /// A new connection is waiting on the handoff channel.
    pub const NEW_CONNECTION: u64 = 4;
}

/// Maximum accumulated request size (headers + body) before a
/// connection is forced to a `413 Content Too Large` response. Not
/// named explicitly in spec.md; chosen as a defensive bound so a single
/// connection cannot grow its read buffer without limit.
pub const MAX_REQUEST_BYTES: u64 = 8 * 1024 * 1024;

/// Shared, cross-thread-readable activity counters for one worker
/// (spec.md §5: "monotonic counters, single writer, readable by the
/// balancer for capacity decisions").
#[derive(Debug, Default)]
pub struct Counters {
    pub(crate) accepted: AtomicU64,
    pub(crate) closed: AtomicU64,
}

impl Counters {
    /// `accepted - closed`; the balancer's load metric.
    pub fn active(&self) -> u64 {
        self.accepted
            .load(Ordering::Relaxed)
            .saturating_sub(self.closed.load(Ordering::Relaxed))
    }
}

/// One worker thread's state.
pub struct Worker {
    idx: usize,
    event_loop: Loop,
    signal_reader: crate::multiplex::wakeup::WakeupReader,
    signal_fd: RawFd,
    new_conns: crossbeam_channel::Receiver<TcpStream>,
    timeouts: TimeoutManager,
    timer_fd: RawFd,
    connections: HashMap<RawFd, Connection>,
    counters: Arc<Counters>,
    handler: Arc<dyn RequestHandler>,
    config: Config,
    /// Present only in REUSEPORT mode, where each worker binds its own
    /// copy of every listener and registration is deferred until
    /// `START` (spec.md §4.F).
    own_listeners: Vec<TcpListener>,
    listener_fds: Vec<RawFd>,
    started: bool,
    shutting_down: bool,
}

impl Worker {
    /// Assembles a worker. The caller is responsible for moving this
    /// onto its own thread and calling [`Worker::run`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        idx: usize,
        efdt: Arc<Efdt>,
        signal_reader: crate::multiplex::wakeup::WakeupReader,
        new_conns: crossbeam_channel::Receiver<TcpStream>,
        counters: Arc<Counters>,
        handler: Arc<dyn RequestHandler>,
        config: Config,
        own_listeners: Vec<TcpListener>,
    ) -> std::io::Result<Self> {
        let mut event_loop = Loop::create(1024, efdt)?;
        let mut signal_reader = signal_reader;
        let signal_fd = signal_reader.stream.as_raw_fd();
        event_loop.add(&mut signal_reader.stream, EventMask::READ, 0)?;

        let mut timeouts = TimeoutManager::create()?;
        let timer_fd = timeouts.timer_mut().reader().stream.as_raw_fd();
        event_loop.add(&mut timeouts.timer_mut().reader().stream, EventMask::READ, 0)?;

        let listener_fds = own_listeners.iter().map(|l| l.as_raw_fd()).collect();

        Ok(Self {
            idx,
            event_loop,
            signal_reader,
            signal_fd,
            new_conns,
            timeouts,
            timer_fd,
            connections: HashMap::new(),
            counters,
            handler,
            config,
            own_listeners,
            listener_fds,
            started: false,
            shutting_down: false,
        })
    }

    /// This worker's index, used for tie-breaking in the balancer and
    /// as a label in logs.
    pub fn idx(&self) -> usize {
        self.idx
    }

    /// Main routine (spec.md §4.E): block on `wait`, dispatch every
    /// ready fd, repeat until `FREE_ALL`.
    pub fn run(mut self) {
        loop {
            if let Err(e) = self.event_loop.wait() {
                tracing::error!(worker = self.idx, error = %e, "multiplexer failure, tearing down worker");
                break;
            }

            let ready: Vec<_> = self.event_loop.foreach().collect();
            for event in ready {
                self.dispatch(event.fd, event.mask);
            }

            if self.shutting_down {
                break;
            }
        }
        self.teardown();
    }

    fn dispatch(&mut self, fd: RawFd, mask: EventMask) {
        if fd == self.signal_fd {
            self.drain_signal();
            return;
        }
        if fd == self.timer_fd {
            self.run_timeout_sweep();
            return;
        }
        if self.listener_fds.contains(&fd) {
            self.accept_on(fd);
            return;
        }
        self.drive_connection(fd, mask);
    }

    fn drain_signal(&mut self) {
        while let Ok(Some(opcode)) = self.signal_reader.read_payload() {
            match opcode {
                opcode::START => self.start_accepting(),
                opcode::SYNC_COUNTERS => {
                    tracing::debug!(
                        worker = self.idx,
                        active = self.counters.active(),
                        "counters snapshot"
                    );
                }
                opcode::FREE_ALL => self.shutting_down = true,
                opcode::NEW_CONNECTION => self.drain_new_connections(),
                other => tracing::warn!(worker = self.idx, opcode = other, "unknown opcode"),
            }
        }
    }

    fn start_accepting(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for listener in &mut self.own_listeners {
            if let Err(e) = self.event_loop.add(listener, EventMask::READ, 0) {
                tracing::error!(worker = self.idx, error = %e, "failed to register listener");
            }
        }
    }

    fn drain_new_connections(&mut self) {
        while let Ok(stream) = self.new_conns.try_recv() {
            self.register_connection(stream);
        }
    }

    fn accept_on(&mut self, listener_fd: RawFd) {
        let Some(listener) = self
            .own_listeners
            .iter()
            .find(|l| l.as_raw_fd() == listener_fd)
        else {
            return;
        };

        loop {
            match acceptor::accept(listener) {
                Ok(Some(stream)) => self.register_connection(stream),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(worker = self.idx, error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn register_connection(&mut self, mut stream: TcpStream) {
        let fd = stream.as_raw_fd();
        if let Err(e) = self.event_loop.add(&mut stream, EventMask::READ, fd as usize) {
            tracing::warn!(worker = self.idx, error = %e, "failed to register accepted connection");
            return;
        }
        self.connections.insert(fd, Connection::new(stream));
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn drive_connection(&mut self, fd: RawFd, mask: EventMask) {
        let Some(conn) = self.connections.get_mut(&fd) else {
            return;
        };

        if mask.contains(EventMask::CLOSE) {
            conn.on_close_event();
        }
        if !matches!(conn.status(), ConnectionStatus::Closing) && mask.contains(EventMask::READ) {
            let _ = conn.on_readable(
                self.handler.as_ref(),
                self.config.max_keepalive_requests,
                MAX_REQUEST_BYTES,
            );
        }
        if !matches!(conn.status(), ConnectionStatus::Closing) && mask.contains(EventMask::WRITE) {
            let _ = conn.on_writable();
        }

        self.rearm(fd);
    }

    fn rearm(&mut self, fd: RawFd) {
        let Some(conn) = self.connections.get_mut(&fd) else {
            return;
        };

        if matches!(conn.status(), ConnectionStatus::Closing) {
            self.close_connection(fd);
            return;
        }

        let mut mask = EventMask::READ;
        if conn.wants_write() {
            mask |= EventMask::WRITE;
        }
        if let Err(e) = self.event_loop.add(conn.socket_mut(), mask, fd as usize) {
            tracing::warn!(worker = self.idx, error = %e, "failed to rearm connection");
        }
    }

    fn close_connection(&mut self, fd: RawFd) {
        if let Some(mut conn) = self.connections.remove(&fd) {
            self.event_loop.del(conn.socket_mut());
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn run_timeout_sweep(&mut self) {
        let _ = self.timeouts.timer_mut().consume_ticks();
        for fd in timeout::sweep(&mut self.connections, self.config.timeout) {
            self.close_connection(fd);
        }
    }

    fn teardown(&mut self) {
        let fds: Vec<RawFd> = self.connections.keys().copied().collect();
        for fd in fds {
            self.close_connection(fd);
        }
        tracing::info!(worker = self.idx, "worker shut down");
    }
}

#[allow(dead_code)]
fn assert_timer_interval_is_sane(d: Duration) -> bool {
    d >= Duration::from_millis(500) && d <= Duration::from_secs(2)
}
