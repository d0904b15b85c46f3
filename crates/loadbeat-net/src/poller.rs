use std::io;

use mio::{Events, Interest, Poll, Token};
use tracing::{debug, warn};

/// Readiness reported for a single polled socket on one `wait` call.
#[derive(Clone, Copy, Debug, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Level-triggered readiness multiplexer over connected sockets, built
/// directly on `mio::Poll`. Registration is keyed by the caller's own
/// `Token` (in this crate, a connection's pool index) so the run loop can
/// map a readiness event straight back to a `Connection` without a side
/// table.
pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self { poll: Poll::new()?, events: Events::with_capacity(capacity) })
    }

    /// Registers a socket with both read and write interest.
    pub fn add(&self, source: &mut impl mio::event::Source, token: Token) -> io::Result<()> {
        self.poll.registry().register(source, token, Interest::READABLE | Interest::WRITABLE)
    }

    /// Toggles write interest on, no-op if already armed.
    pub fn add_write(
        &self,
        source: &mut impl mio::event::Source,
        token: Token,
        read_armed: bool,
    ) -> io::Result<()> {
        let interest =
            if read_armed { Interest::READABLE | Interest::WRITABLE } else { Interest::WRITABLE };
        self.poll.registry().reregister(source, token, interest)
    }

    /// Toggles write interest off, no-op if already disarmed.
    pub fn del_write(
        &self,
        source: &mut impl mio::event::Source,
        token: Token,
        read_armed: bool,
    ) -> io::Result<()> {
        if read_armed {
            self.poll.registry().reregister(source, token, Interest::READABLE)
        } else {
            // Nothing left to watch; mio has no "no interest" registration so the
            // caller is expected to deregister entirely in that case.
            Ok(())
        }
    }

    pub fn del(&self, source: &mut impl mio::event::Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Waits up to `timeout` for readiness, returning the number of ready
    /// sockets. A zero return with a finite timeout is a quiescent tick; a
    /// zero return with `timeout == None` would mean no forward progress is
    /// possible and is treated as fatal by the run loop, never by this call.
    pub fn wait(&mut self, timeout: Option<std::time::Duration>) -> io::Result<usize> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => return Ok(self.events.iter().count()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("poll interrupted, retrying");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "poll failed");
                    return Err(e);
                }
            }
        }
    }

    pub fn ready(&self) -> impl Iterator<Item = (Token, Readiness)> + '_ {
        self.events.iter().map(|ev| {
            (
                ev.token(),
                Readiness {
                    readable: ev.is_readable(),
                    writable: ev.is_writable(),
                    error: ev.is_error(),
                },
            )
        })
    }
}
