//! Scheduler — spec.md §4.F.
//!
//! Owns every worker thread and, in `FairBalancing` mode, a dedicated
//! balancer thread that accepts on every listener and distributes
//! connections by load. In `Reuseport` mode each worker binds its own
//! copy of every listener with `SO_REUSEPORT` and the kernel does the
//! distribution; the balancer thread still exists, but only to hold the
//! listener sockets open and to broadcast `START`.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use mio::net::{TcpListener, TcpStream};

use crate::acceptor;
use crate::config::{Config, SchedulerMode};
use crate::efdt::Efdt;
use crate::error::EngineError;
use crate::multiplex::wakeup::{self, WakeupWriter};
use crate::multiplex::{EventMask, Loop};
use crate::response::RequestHandler;
use crate::worker::{opcode, Counters, Worker};

/// Worker-boot handshake (spec.md §5: "the only mutex covers
/// worker-boot handshake"). The scheduler blocks on this after spawning
/// every worker thread so accepting never starts before all workers have
/// entered their run loop.
#[derive(Default)]
struct BootBarrier {
    ready: Mutex<usize>,
    all_ready: Condvar,
}

impl BootBarrier {
    fn mark_ready(&self) {
        let mut ready = self.ready.lock().unwrap();
        *ready += 1;
        self.all_ready.notify_all();
    }

    fn wait_for(&self, expected: usize) {
        let mut ready = self.ready.lock().unwrap();
        while *ready < expected {
            ready = self.all_ready.wait(ready).unwrap();
        }
    }
}

/// Everything the scheduler keeps about one worker after spawning it.
struct WorkerHandle {
    signal: WakeupWriter,
    new_conns: crossbeam_channel::Sender<TcpStream>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<()>>,
}

/// Owns the worker pool and (in `FairBalancing` mode) the balancer
/// thread.
pub struct Scheduler {
    mode: SchedulerMode,
    handles: Vec<WorkerHandle>,
    capacity: u64,
    balancer_signal: Option<WakeupWriter>,
    balancer: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Binds every listener in `config` and spawns `config.workers`
    /// worker threads, wired per `config.scheduler_mode`.
    pub fn start(config: Config, handler: Arc<dyn RequestHandler>) -> Result<Self, EngineError> {
        let capacity = server_capacity(&config);
        let efdt = Arc::new(Efdt::new(capacity as usize));
        let reuseport = matches!(config.scheduler_mode, SchedulerMode::Reuseport);

        let mut handles = Vec::with_capacity(config.workers);
        let mut worker_listeners: Vec<Vec<TcpListener>> = (0..config.workers).map(|_| Vec::new()).collect();

        if reuseport {
            for addr in &config.listeners {
                for per_worker in worker_listeners.iter_mut() {
                    per_worker.push(bind_or_fatal(*addr, true)?);
                }
            }
        }

        let boot = Arc::new(BootBarrier::default());

        for (idx, listeners) in worker_listeners.into_iter().enumerate() {
            let (signal_reader, signal_writer) =
                wakeup::pair().map_err(EngineError::MultiplexerFailure)?;
            let (tx, rx) = crossbeam_channel::unbounded();
            let counters = Arc::new(Counters::default());

            let worker = Worker::new(
                idx,
                efdt.clone(),
                signal_reader,
                rx,
                counters.clone(),
                handler.clone(),
                config.clone(),
                listeners,
            )
            .map_err(EngineError::MultiplexerFailure)?;

            let worker_boot = boot.clone();
            let join = std::thread::Builder::new()
                .name(format!("monkeyd-worker-{idx}"))
                .spawn(move || {
                    worker_boot.mark_ready();
                    worker.run()
                })
                .expect("failed to spawn worker thread");

            handles.push(WorkerHandle {
                signal: signal_writer,
                new_conns: tx,
                counters,
                join: Some(join),
            });
        }

        boot.wait_for(handles.len());

        let (balancer, balancer_signal) = if reuseport {
            for handle in &handles {
                let _ = handle.signal.write_payload(opcode::START);
            }
            (None, None)
        } else {
            let listeners = config
                .listeners
                .iter()
                .map(|addr| bind_or_fatal(*addr, false))
                .collect::<Result<Vec<_>, _>>()?;
            let dispatch_targets: Vec<(WakeupWriter, crossbeam_channel::Sender<TcpStream>, Arc<Counters>)> =
                handles
                    .iter()
                    .map(|h| (h.signal.clone(), h.new_conns.clone(), h.counters.clone()))
                    .collect();
            let (balancer_reader, balancer_writer) =
                wakeup::pair().map_err(EngineError::MultiplexerFailure)?;
            let per_worker_cap = capacity.div_ceil(config.workers.max(1) as u64);

            let handle = std::thread::Builder::new()
                .name("monkeyd-balancer".into())
                .spawn(move || run_balancer(listeners, dispatch_targets, balancer_reader, per_worker_cap))
                .expect("failed to spawn balancer thread");

            (Some(handle), Some(balancer_writer))
        };

        Ok(Self {
            mode: config.scheduler_mode,
            handles,
            capacity,
            balancer_signal,
            balancer,
        })
    }

    /// Scheduler mode this instance is running.
    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    /// `server_capacity` as computed at startup (spec.md §4.F).
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Sum of `active_connections` across all workers.
    pub fn active_connections(&self) -> u64 {
        self.handles.iter().map(|h| h.counters.active()).sum()
    }

    /// Posts `FREE_ALL` to every worker (and the balancer, if any) and
    /// joins all threads (spec.md §5's graceful shutdown sequence).
    pub fn shutdown(mut self) {
        if let Some(signal) = &self.balancer_signal {
            let _ = signal.write_payload(opcode::FREE_ALL);
        }
        for handle in &self.handles {
            let _ = handle.signal.write_payload(opcode::FREE_ALL);
        }
        if let Some(join) = self.balancer.take() {
            let _ = join.join();
        }
        for handle in &mut self.handles {
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
    }
}

/// `min(configured_fd_limit, RLIMIT_NOFILE)`, spec.md §4.F.
fn server_capacity(config: &Config) -> u64 {
    // SAFETY: `rlimit` is a plain POD struct and `getrlimit` only ever
    // writes to it; a failed call leaves it zeroed, handled below.
    let rlim_cur = unsafe {
        let mut rl = std::mem::MaybeUninit::<libc::rlimit>::zeroed();
        if libc::getrlimit(libc::RLIMIT_NOFILE, rl.as_mut_ptr()) == 0 {
            rl.assume_init().rlim_cur
        } else {
            config.fd_limit
        }
    };
    config.fd_limit.min(rlim_cur)
}

fn bind_or_fatal(addr: SocketAddr, reuseport: bool) -> Result<TcpListener, EngineError> {
    acceptor::bind(addr, reuseport).map_err(|source| EngineError::BindFailed { addr, source })
}

/// The `FairBalancing` balancer thread: owns every listener directly,
/// picks the least-loaded worker per accept, and hands the accepted
/// stream off over that worker's channel + signal fd.
fn run_balancer(
    listeners: Vec<TcpListener>,
    mut targets: Vec<(WakeupWriter, crossbeam_channel::Sender<TcpStream>, Arc<Counters>)>,
    mut signal_reader: wakeup::WakeupReader,
    per_worker_cap: u64,
) {
    let efdt = Arc::new(Efdt::new(listeners.len() + 1));
    let mut event_loop = match Loop::create(128, efdt) {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "balancer failed to create event loop");
            return;
        }
    };

    let signal_fd = {
        use std::os::unix::io::AsRawFd;
        signal_reader.stream.as_raw_fd()
    };
    if let Err(e) = event_loop.add(&mut signal_reader.stream, EventMask::READ, 0) {
        tracing::error!(error = %e, "balancer failed to register signal channel");
        return;
    }

    let mut listeners = listeners;
    let listener_fds: Vec<_> = {
        use std::os::unix::io::AsRawFd;
        listeners.iter().map(|l| l.as_raw_fd()).collect()
    };
    for listener in &mut listeners {
        if let Err(e) = event_loop.add(listener, EventMask::READ, 0) {
            tracing::error!(error = %e, "balancer failed to register listener");
            return;
        }
    }

    loop {
        if event_loop.wait().is_err() {
            break;
        }

        let ready: Vec<_> = event_loop.foreach().collect();
        let mut shutdown = false;
        for event in ready {
            if event.fd == signal_fd {
                while let Ok(Some(op)) = signal_reader.read_payload() {
                    if op == opcode::FREE_ALL {
                        shutdown = true;
                    }
                }
                continue;
            }
            if let Some(pos) = listener_fds.iter().position(|fd| *fd == event.fd) {
                accept_and_dispatch(&listeners[pos], &mut targets, per_worker_cap);
            }
        }
        if shutdown {
            break;
        }
    }
}

fn accept_and_dispatch(
    listener: &TcpListener,
    targets: &mut [(WakeupWriter, crossbeam_channel::Sender<TcpStream>, Arc<Counters>)],
    per_worker_cap: u64,
) {
    loop {
        match acceptor::accept(listener) {
            Ok(Some(stream)) => dispatch(stream, targets, per_worker_cap),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

fn dispatch(
    stream: TcpStream,
    targets: &mut [(WakeupWriter, crossbeam_channel::Sender<TcpStream>, Arc<Counters>)],
    per_worker_cap: u64,
) {
    let Some((idx, _)) = targets
        .iter()
        .enumerate()
        .min_by_key(|(_, (_, _, counters))| counters.active())
    else {
        return;
    };

    if targets[idx].2.active() >= per_worker_cap {
        tracing::warn!(capacity = per_worker_cap, "over capacity, rejecting accept");
        drop(stream);
        return;
    }

    let (signal, new_conns, _) = &targets[idx];
    if new_conns.send(stream).is_ok() {
        let _ = signal.write_payload(opcode::NEW_CONNECTION);
    }
}
