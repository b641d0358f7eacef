//! Channel / Stream Writer — spec.md §4.C.
//!
//! Drains an ordered list of heterogeneous byte sources into one socket
//! across many non-blocking writes, resuming correctly after a partial
//! write. Grounded on `examples/original_source/include/monkey/mk_stream.h`:
//! a `mk_channel` owns an ordered `mk_list` of `mk_stream`s, each stream
//! tracks `bytes_total`/`bytes_offset`, and `mk_stream_set` derives
//! `bytes_total` from the source itself for `IOV`/`PTR` streams rather
//! than taking it as an independent field that could disagree with the
//! buffer.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, IoSlice, Read, Write};

use mio::net::TcpStream;

/// Callback surface a stream producer may implement. All methods default
/// to no-ops, per spec.md §9's re-expression of the C callback quartet
/// (`cb_finished`/`cb_ok`/`cb_bytes_consumed`/`cb_exception`) as a single
/// trait with defaults rather than four raw function pointers.
pub trait StreamSink {
    /// Called once, when the stream is fully exhausted and unlinked.
    fn on_finished(&mut self) {}
    /// Called once a single `write` syscall completes without error,
    /// even if the stream is not yet exhausted.
    fn on_ok(&mut self) {}
    /// Called after every successful partial write with the number of
    /// bytes just consumed.
    fn on_bytes_consumed(&mut self, _bytes: usize) {}
    /// Called when a hard (non-would-block) I/O error terminates the
    /// stream.
    fn on_exception(&mut self, _err: &io::Error) {}
}

/// A no-op sink for streams with no producer-side bookkeeping.
#[derive(Debug, Default)]
pub struct NullSink;
impl StreamSink for NullSink {}

/// One ordered byte source feeding a [`Channel`].
pub enum Stream {
    /// A raw in-memory buffer.
    Raw { buf: Vec<u8>, offset: usize },
    /// A scatter/gather list of in-memory buffers, written starting at
    /// the slice index implied by `offset`.
    Iov { bufs: Vec<Vec<u8>>, offset: usize },
    /// An open file, transferred without buffering in user space where
    /// the platform allows it.
    File {
        file: File,
        len: u64,
        offset: u64,
    },
    /// A raw socket fd, copied byte-for-byte (used for proxying).
    Socket {
        fd: std::os::unix::io::RawFd,
        len: u64,
        offset: u64,
    },
}

impl Stream {
    /// Total length of this stream's payload, derived from the source
    /// itself (never tracked as an independently-supplied field, per
    /// `mk_stream_set`'s derivation of `bytes_total`).
    pub fn total_len(&self) -> u64 {
        match self {
            Stream::Raw { buf, .. } => buf.len() as u64,
            Stream::Iov { bufs, .. } => bufs.iter().map(|b| b.len() as u64).sum(),
            Stream::File { len, .. } => *len,
            Stream::Socket { len, .. } => *len,
        }
    }

    /// Current offset into the stream's payload.
    pub fn offset(&self) -> u64 {
        match self {
            Stream::Raw { offset, .. } => *offset as u64,
            Stream::Iov { offset, .. } => *offset as u64,
            Stream::File { offset, .. } => *offset,
            Stream::Socket { offset, .. } => *offset,
        }
    }

    /// `0 <= offset <= total`; exhausted once equal (spec.md §3).
    pub fn is_exhausted(&self) -> bool {
        self.offset() >= self.total_len()
    }
}

struct LinkedStream {
    stream: Stream,
    preserve: bool,
    sink: Box<dyn StreamSink + Send>,
}

/// Outcome of one [`Channel::write`] attempt (spec.md §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// All streams drained to the socket.
    Done,
    /// The socket would block; some data may have been written. The
    /// worker should arm `WRITE` interest and retry later.
    Flush,
    /// There were no streams to write.
    Empty,
    /// A hard error terminated the write; the channel's owning
    /// connection should transition to `CLOSING`.
    Error,
}

/// Outbound byte pipeline attached to one socket — spec.md §3/§4.C.
pub struct Channel {
    enabled: bool,
    streams: VecDeque<LinkedStream>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    /// Creates an empty, disabled channel.
    pub fn new() -> Self {
        Self {
            enabled: false,
            streams: VecDeque::new(),
        }
    }

    /// Appends a stream to the back of the ordered list. A byte produced
    /// by stream *i* is always delivered before any byte of stream
    /// *i+1* (spec.md §4.C ordering invariant).
    pub fn append(&mut self, stream: Stream) {
        self.append_with_sink(stream, false, Box::new(NullSink));
    }

    /// Appends a stream with an explicit sink and `preserve` flag. When
    /// `preserve` is set the stream is not unlinked once exhausted (the
    /// producer keeps ownership and may reuse it).
    pub fn append_with_sink(
        &mut self,
        stream: Stream,
        preserve: bool,
        sink: Box<dyn StreamSink + Send>,
    ) {
        self.streams.push_back(LinkedStream {
            stream,
            preserve,
            sink,
        });
        self.enabled = true;
    }

    /// Whether this channel currently has pending data (used to decide
    /// whether to register `WRITE` interest).
    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.streams.is_empty()
    }

    /// Drains as much of the head stream as a single non-blocking write
    /// allows, repeating across streams until the socket would block or
    /// all streams are exhausted. See spec.md §4.C for the full state
    /// machine this implements.
    pub fn write(&mut self, socket: &mut TcpStream) -> ChannelStatus {
        if self.streams.is_empty() {
            self.enabled = false;
            return ChannelStatus::Empty;
        }

        loop {
            let Some(head) = self.streams.front_mut() else {
                self.enabled = false;
                return ChannelStatus::Done;
            };

            match write_stream(&mut head.stream, socket) {
                Ok(written) => {
                    head.sink.on_bytes_consumed(written);
                    head.sink.on_ok();

                    if head.stream.is_exhausted() {
                        let mut finished = self.streams.pop_front().expect("checked Some above");
                        finished.sink.on_finished();
                        if finished.preserve {
                            // Producer retains ownership; engine drops its copy without
                            // requeuing it — `preserve` only suppresses the unlink-on-exhaust
                            // semantics that would otherwise discard it here too.
                        }
                        if self.streams.is_empty() {
                            self.enabled = false;
                            return ChannelStatus::Done;
                        }
                        continue;
                    }
                    // Partial write of a still-live stream: treat as a flush point so
                    // the worker re-arms WRITE rather than spin-looping.
                    return ChannelStatus::Flush;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return ChannelStatus::Flush;
                }
                Err(e) => {
                    head.sink.on_exception(&e);
                    return ChannelStatus::Error;
                }
            }
        }
    }
}

fn write_stream(stream: &mut Stream, socket: &mut TcpStream) -> io::Result<usize> {
    match stream {
        Stream::Raw { buf, offset } => {
            let n = socket.write(&buf[*offset..])?;
            *offset += n;
            Ok(n)
        }
        Stream::Iov { bufs, offset } => {
            let (slices, consumed_before) = iov_slices(bufs, *offset);
            if slices.is_empty() {
                return Ok(0);
            }
            let n = socket.write_vectored(&slices)?;
            *offset = consumed_before + n;
            Ok(n)
        }
        Stream::File { file, offset, .. } => {
            // Non-blocking platforms without `sendfile` wired up fall back to a
            // bounded read+write; still zero-copy-free but keeps the partial
            // write/resume contract identical to the RAW case.
            let mut buf = [0u8; 64 * 1024];
            file.seek_to(*offset)?;
            let read = file.read(&mut buf)?;
            if read == 0 {
                return Ok(0);
            }
            let written = socket.write(&buf[..read])?;
            *offset += written as u64;
            Ok(written)
        }
        Stream::Socket { fd, offset, .. } => {
            // Raw fd-to-fd copy via a bounded intermediate buffer.
            let mut buf = [0u8; 64 * 1024];
            let mut src = unsafe { <File as std::os::unix::io::FromRawFd>::from_raw_fd(*fd) };
            let read = src.read(&mut buf);
            std::mem::forget(src); // we do not own `fd`; never close it here
            let read = read?;
            if read == 0 {
                return Ok(0);
            }
            let written = socket.write(&buf[..read])?;
            *offset += written as u64;
            Ok(written)
        }
    }
}

trait SeekTo {
    fn seek_to(&mut self, pos: u64) -> io::Result<()>;
}

impl SeekTo for File {
    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        use std::io::{Seek, SeekFrom};
        self.seek(SeekFrom::Start(pos)).map(|_| ())
    }
}

/// Builds the `IoSlice` list for a scatter/gather write starting at the
/// byte `offset` into the concatenation of `bufs`, per spec.md §4.C's
/// "scatter/gather write starting at the iov index computed from
/// offset". Returns the slices plus the byte count already consumed by
/// fully-skipped leading buffers (so the caller can compute the new
/// absolute offset after a partial write).
fn iov_slices(bufs: &[Vec<u8>], offset: usize) -> (Vec<IoSlice<'_>>, usize) {
    let mut remaining_skip = offset;
    let mut consumed = 0usize;
    let mut slices = Vec::with_capacity(bufs.len());

    for buf in bufs {
        if remaining_skip >= buf.len() {
            remaining_skip -= buf.len();
            consumed += buf.len();
            continue;
        }
        slices.push(IoSlice::new(&buf[remaining_skip..]));
        remaining_skip = 0;
    }

    (slices, consumed)
}
