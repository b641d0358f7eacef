//! Engine configuration.
//!
//! Satisfies the collaborator contract of spec.md §6:
//! `{workers, timeout, keepalive, max_keepalive_requests, fd_limit,
//! scheduler_mode, listeners[]}`. Loading configuration from a file is an
//! explicitly out-of-scope concern (spec.md §1); this struct is
//! `serde`-friendly so an external loader can populate it, matching the
//! pattern of domain structs deriving `serde::Deserialize` while the file
//! format itself lives in another layer (see `Masorubka1-iscsi-client-rs`).

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which of the two connection-distribution strategies (spec.md §4.F) a
/// [`crate::scheduler::Scheduler`] should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerMode {
    /// A dedicated balancer thread owns all listeners and distributes
    /// accepted connections to the least-loaded worker.
    FairBalancing,
    /// Every worker binds the same listener with `SO_REUSEPORT`; the
    /// kernel distributes accepts directly to worker threads.
    Reuseport,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of worker threads to run.
    pub workers: usize,
    /// Idle timeout after which a `READING`/`KEEPALIVE` connection is
    /// reclaimed (spec.md §4.H).
    pub timeout: Duration,
    /// Whether keep-alive is offered to clients that don't request
    /// `Connection: close`.
    pub keepalive: bool,
    /// Maximum requests served on one connection before the engine forces
    /// `Connection: close` on the final response (spec.md §9).
    pub max_keepalive_requests: u32,
    /// Soft ceiling on open file descriptors the process will attempt to
    /// use; clamped against `RLIMIT_NOFILE` to produce
    /// `server_capacity` (spec.md §4.F).
    pub fd_limit: u64,
    /// Connection distribution strategy.
    pub scheduler_mode: SchedulerMode,
    /// Addresses to bind and listen on.
    pub listeners: Vec<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/// Builder for [`Config`], following the same builder-pattern shape the
/// teacher crate uses for `ListenerConfig`.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    workers: usize,
    timeout: Duration,
    keepalive: bool,
    max_keepalive_requests: u32,
    fd_limit: u64,
    scheduler_mode: SchedulerMode,
    listeners: Vec<SocketAddr>,
}

impl ConfigBuilder {
    /// Creates a builder seeded with sane defaults: one worker per
    /// available core, a 60s idle timeout, keep-alive enabled for up to
    /// 100 requests per connection, and `FairBalancing`.
    pub fn new() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            timeout: Duration::from_secs(60),
            keepalive: true,
            max_keepalive_requests: 100,
            fd_limit: 1024,
            scheduler_mode: SchedulerMode::FairBalancing,
            listeners: Vec::new(),
        }
    }

    /// Sets the worker count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the idle timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables or disables keep-alive.
    pub fn keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Sets the per-connection request cap.
    pub fn max_keepalive_requests(mut self, max: u32) -> Self {
        self.max_keepalive_requests = max;
        self
    }

    /// Sets the configured fd limit (clamped against `RLIMIT_NOFILE` at
    /// startup by [`crate::scheduler::Scheduler::start`]).
    pub fn fd_limit(mut self, fd_limit: u64) -> Self {
        self.fd_limit = fd_limit;
        self
    }

    /// Sets the scheduler mode.
    pub fn scheduler_mode(mut self, mode: SchedulerMode) -> Self {
        self.scheduler_mode = mode;
        self
    }

    /// Appends a listener address.
    pub fn listener(mut self, addr: SocketAddr) -> Self {
        self.listeners.push(addr);
        self
    }

    /// Builds the [`Config`].
    pub fn build(self) -> Config {
        Config {
            workers: self.workers,
            timeout: self.timeout,
            keepalive: self.keepalive,
            max_keepalive_requests: self.max_keepalive_requests,
            fd_limit: self.fd_limit,
            scheduler_mode: self.scheduler_mode,
            listeners: self.listeners,
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
