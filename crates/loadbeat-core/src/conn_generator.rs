//! Connection generator: creates connections to the target at the
//! configured rate until `num_conns` have been created (successfully or
//! not), then waits for all of them to be torn down before stopping the
//! run.

use loadbeat_net::SocketErrorKind;

use crate::event::{Event, EventType};
use crate::generator::GenState;
use crate::runtime::Runtime;

fn make_conn_done(rt: &Runtime) -> bool {
    rt.nconn_created + rt.nconn_create_failed == rt.config.num_conns
}

/// One tick: allocates a connection, starts its nonblocking connect, and
/// stops the generator once `num_conns` have been attempted.
pub fn tick(rt: &mut Runtime) {
    debug_assert!(!make_conn_done(rt));

    match rt.alloc_connection() {
        Some(handle) => {
            rt.nconn_created += 1;
            crate::conn::connect(rt, handle, rt.config.connect_timeout);
            rt.signal(Event::ConnCreated(handle));
        }
        None => {
            rt.nconn_create_failed += 1;
            tracing::warn!("failed to allocate a connection slot");
        }
    }

    if make_conn_done(rt) {
        rt.conn_gen.state = GenState::Done;
        tracing::info!(
            created = rt.nconn_created,
            failed = rt.nconn_create_failed,
            wanted = rt.config.num_conns,
            "connection generator has issued all planned connections"
        );
        if rt.nconn_destroyed == rt.nconn_created {
            rt.request_stop();
        }
    }
}

fn on_destroyed(rt: &mut Runtime, event: Event) {
    let Event::ConnDestroyed(_) = event else { return };
    rt.nconn_destroyed += 1;

    if make_conn_done(rt) && rt.nconn_destroyed == rt.nconn_created {
        tracing::info!(
            destroyed = rt.nconn_destroyed,
            created = rt.nconn_created,
            wanted = rt.config.num_conns,
            "all connections have been destroyed"
        );
        rt.request_stop();
        return;
    }

    if rt.conn_gen.oneshot {
        rt.signal(Event::GenConnFire);
    }
}

fn on_trigger(rt: &mut Runtime, event: Event) {
    let Event::GenConnTrigger = event else { return };
    crate::runtime::start_conn_generator(rt);
}

/// A completion-driven generator only advances when its prior unit of
/// work finishes and `on_destroyed` republishes this event.
fn on_fire(rt: &mut Runtime, event: Event) {
    let Event::GenConnFire = event else { return };
    if !rt.conn_gen.is_done() {
        tick(rt);
    }
}

pub fn init(rt: &mut Runtime) {
    rt.bus.register(EventType::ConnDestroyed, on_destroyed);
    rt.bus.register(EventType::GenConnTrigger, on_trigger);
    rt.bus.register(EventType::GenConnFire, on_fire);
}

/// Classifies a connect failure as either "every slot is exhausted" (no
/// socket errors involved) or a genuine socket-level error, purely so the
/// caller can log the right message; the counters themselves don't care.
pub fn describe_failure(kind: SocketErrorKind) -> &'static str {
    match kind {
        SocketErrorKind::FdUnavailable | SocketErrorKind::FileTableFull => "out of file descriptors",
        SocketErrorKind::Refused => "connection refused",
        SocketErrorKind::Reset => "connection reset",
        SocketErrorKind::TimedOut => "connect timed out",
        SocketErrorKind::AddrUnavailable => "address unavailable",
        SocketErrorKind::Other => "socket error",
    }
}
