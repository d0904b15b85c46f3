use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};

use mio::net::TcpStream;

/// Resolves `host:port` to a socket address, taking the first result exactly
/// as the reference implementation takes the first entry `getaddrinfo`
/// returns — this tool doesn't care whether it ends up on IPv4 or IPv6.
pub fn resolve_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}:{port}")))
}

/// Begins a nonblocking connect. Returns the stream regardless of whether
/// the connect completed immediately or is in progress (mio sockets are
/// always nonblocking, matching `fcntl(O_NONBLOCK)` in the reference
/// implementation).
pub fn connect_nonblocking(addr: SocketAddr) -> io::Result<TcpStream> {
    TcpStream::connect(addr)
}

pub fn set_tcp_nodelay(stream: &TcpStream, enabled: bool) -> io::Result<()> {
    stream.set_nodelay(enabled)
}

/// `SO_LINGER` isn't exposed by `mio`/`std`, so this goes straight to
/// `setsockopt` via the raw fd, matching the reference implementation's own
/// direct syscall.
pub fn set_linger(stream: &TcpStream, timeout_secs: i32) -> io::Result<()> {
    let linger = libc::linger { l_onoff: 1, l_linger: timeout_secs };
    setsockopt(stream.as_raw_fd(), libc::SOL_SOCKET, libc::SO_LINGER, &linger)
}

pub fn set_send_buffer(stream: &TcpStream, size: i32) -> io::Result<()> {
    setsockopt(stream.as_raw_fd(), libc::SOL_SOCKET, libc::SO_SNDBUF, &size)
}

pub fn set_recv_buffer(stream: &TcpStream, size: i32) -> io::Result<()> {
    setsockopt(stream.as_raw_fd(), libc::SOL_SOCKET, libc::SO_RCVBUF, &size)
}

/// Retrieves and clears `SO_ERROR`, the errno left behind by a failed
/// nonblocking connect or a socket-level error reported by the poller.
pub fn take_socket_error(fd: RawFd) -> io::Result<i32> {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            std::ptr::from_mut(&mut err).cast(),
            &mut len,
        )
    };
    if rc < 0 { Err(io::Error::last_os_error()) } else { Ok(err) }
}

fn setsockopt<T>(fd: RawFd, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    let len = std::mem::size_of::<T>() as libc::socklen_t;
    let rc = unsafe {
        libc::setsockopt(fd, level, name, std::ptr::from_ref(value).cast(), len)
    };
    if rc < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}

/// The disjoint socket-error buckets the stats collector files a failed
/// connection under, matching the `errno` switch the bucketing is grounded
/// on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketErrorKind {
    FdUnavailable,
    FileTableFull,
    AddrUnavailable,
    Refused,
    Reset,
    TimedOut,
    Other,
}

#[must_use]
pub fn classify_errno(errno: i32) -> SocketErrorKind {
    match errno {
        libc::EMFILE => SocketErrorKind::FdUnavailable,
        libc::ENFILE => SocketErrorKind::FileTableFull,
        libc::ECONNREFUSED => SocketErrorKind::Refused,
        libc::EPIPE | libc::ECONNRESET => SocketErrorKind::Reset,
        libc::ETIMEDOUT => SocketErrorKind::TimedOut,
        libc::EADDRNOTAVAIL => SocketErrorKind::AddrUnavailable,
        _ => SocketErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_errnos() {
        assert_eq!(classify_errno(libc::ECONNREFUSED), SocketErrorKind::Refused);
        assert_eq!(classify_errno(libc::ETIMEDOUT), SocketErrorKind::TimedOut);
        assert_eq!(classify_errno(libc::EPIPE), SocketErrorKind::Reset);
        assert_eq!(classify_errno(9999), SocketErrorKind::Other);
    }

    #[test]
    fn resolves_localhost() {
        let addr = resolve_addr("127.0.0.1", 11211).unwrap();
        assert!(addr.is_ipv4());
    }
}
