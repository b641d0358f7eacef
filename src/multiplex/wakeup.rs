//! Cross-thread wakeup primitives — spec.md §4.A/§6/§9.
//!
//! Both the inter-thread signal channel and the periodic timeout tick
//! ride on an fd already registered in a worker's loop, per spec.md §9's
//! "signal-via-FD" design note: never reach for a condition variable, as
//! that would force a suspension point outside [`crate::multiplex::Loop::wait`].
//! `mio::Waker` only wakes a poll; it carries no payload, and spec.md
//! requires genuine 8-byte opcode/tick payloads, so we build the
//! primitive ourselves on top of a connected `UnixStream` pair (the same
//! building block `mio::Waker` itself is implemented with on most Unix
//! targets).

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::net::UnixStream;

/// The read half of a wakeup pair: register this in a [`crate::multiplex::Loop`]
/// and read 8-byte payloads from it when it becomes readable.
#[derive(Debug)]
pub struct WakeupReader {
    pub(crate) stream: UnixStream,
}

impl WakeupReader {
    /// Reads one 8-byte payload. Returns `Ok(None)` on a spurious
    /// would-block wakeup (level-triggered re-delivery after a previous
    /// drain already consumed the byte).
    pub fn read_payload(&mut self) -> io::Result<Option<u64>> {
        let mut buf = [0u8; 8];
        match self.stream.read_exact(&mut buf) {
            Ok(()) => Ok(Some(u64::from_ne_bytes(buf))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The write half of a wakeup pair, shared by any thread that needs to
/// post opcodes or tick counts.
#[derive(Debug, Clone)]
pub struct WakeupWriter {
    stream: Arc<std::sync::Mutex<std::os::unix::net::UnixStream>>,
}

impl WakeupWriter {
    /// Writes one 8-byte payload, waking the loop that has the paired
    /// [`WakeupReader`] registered.
    pub fn write_payload(&self, value: u64) -> io::Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        stream.write_all(&value.to_ne_bytes())
    }
}

/// Creates a connected reader/writer pair usable as the `channel_create`
/// primitive of spec.md §4.A: "writes to `w` are readable on `r`;
/// payload unit is 8 bytes."
pub fn pair() -> io::Result<(WakeupReader, WakeupWriter)> {
    let (read_half, write_half) = std::os::unix::net::UnixStream::pair()?;
    write_half.set_nonblocking(false)?;
    let mio_half = UnixStream::from_std(read_half);
    Ok((
        WakeupReader { stream: mio_half },
        WakeupWriter {
            stream: Arc::new(std::sync::Mutex::new(write_half)),
        },
    ))
}

/// A periodic timer fd: `timeout_create(loop, seconds)` of spec.md §4.A.
///
/// Internally a background thread sleeps the configured interval and
/// writes an incrementing tick count to the write half of a wakeup pair;
/// the read half is what callers register in their loop. The numeric
/// tick value is advisory only, per spec.md §6.
#[derive(Debug)]
pub struct TimerFd {
    reader: WakeupReader,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimerFd {
    /// Starts a timer firing every `period`.
    pub fn create(period: Duration) -> io::Result<Self> {
        let (reader, writer) = pair()?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();

        let handle = std::thread::Builder::new()
            .name("monkeyd-timer".into())
            .spawn(move || {
                let mut ticks: u64 = 0;
                while !stop_thread.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    if stop_thread.load(Ordering::Relaxed) {
                        break;
                    }
                    ticks += 1;
                    if writer.write_payload(ticks).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn timer thread");

        Ok(Self {
            reader,
            stop,
            handle: Some(handle),
        })
    }

    /// The read half to register with a [`crate::multiplex::Loop`].
    pub fn reader(&mut self) -> &mut WakeupReader {
        &mut self.reader
    }

    /// Consumes the current tick count; the numeric value is advisory
    /// (spec.md §6), callers only need to know "at least one tick fired".
    pub fn consume_ticks(&mut self) -> io::Result<Option<u64>> {
        self.reader.read_payload()
    }
}

impl Drop for TimerFd {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
