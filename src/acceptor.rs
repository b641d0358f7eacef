//! Acceptor — spec.md §4.G.
//!
//! Binding and non-blocking accept for listening sockets. Socket option
//! setup (`SO_REUSEADDR`, `SO_REUSEPORT`, `TCP_DEFER_ACCEPT`) lives here
//! rather than in [`crate::scheduler`], since it's purely a property of
//! how a listener is brought up, independent of which scheduler mode
//! ends up driving it.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;

use mio::net::{TcpListener, TcpSocket};

/// Backlog passed to `listen(2)`. Not exposed in [`crate::config::Config`]
/// since spec.md names no tuning knob for it.
const BACKLOG: u32 = 1024;

/// Binds one listening socket per spec.md §6: `SO_REUSEADDR` always,
/// `SO_REUSEPORT` when `reuseport` is requested (REUSEPORT scheduler
/// mode), `TCP_DEFER_ACCEPT` best-effort on Linux.
pub fn bind(addr: SocketAddr, reuseport: bool) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }?;

    socket.set_reuseaddr(true)?;
    if reuseport {
        if let Err(e) = socket.set_reuseport(true) {
            tracing::warn!(%addr, error = %e, "SO_REUSEPORT not available, continuing without it");
        }
    }

    socket.bind(addr)?;
    let listener = socket.listen(BACKLOG)?;
    set_defer_accept(&listener);
    Ok(listener)
}

#[cfg(target_os = "linux")]
fn set_defer_accept(listener: &TcpListener) {
    const TCP_DEFER_ACCEPT: libc::c_int = 9;
    let fd = listener.as_raw_fd();
    let seconds: libc::c_int = 1;
    // SAFETY: fd is a valid, open socket owned by `listener` for the
    // duration of this call; the option value is a plain `c_int` on the
    // stack matching the size passed.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            TCP_DEFER_ACCEPT,
            &seconds as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        tracing::warn!(
            error = %io::Error::last_os_error(),
            "TCP_DEFER_ACCEPT unavailable, continuing without it"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn set_defer_accept(_listener: &TcpListener) {}

/// One non-blocking accept. `Ok(None)` means no connection was pending
/// (`EWOULDBLOCK`/`EAGAIN`); callers loop on this until it returns
/// `None` to drain every pending accept in one readiness notification.
pub fn accept(listener: &TcpListener) -> io::Result<Option<mio::net::TcpStream>> {
    match listener.accept() {
        Ok((stream, _peer)) => Ok(Some(stream)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}
