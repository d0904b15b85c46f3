mod poller;
mod socket;

pub use mio::Token;
pub use mio::net::TcpStream;
pub use poller::{Poller, Readiness};
pub use socket::{
    SocketErrorKind, classify_errno, connect_nonblocking, resolve_addr, set_linger,
    set_recv_buffer, set_send_buffer, set_tcp_nodelay, take_socket_error,
};
