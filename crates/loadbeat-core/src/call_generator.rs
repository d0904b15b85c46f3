//! Call generator: issues calls on one connection at the configured rate
//! until `num_calls` have been attempted on it, then waits for all of
//! them to complete before signalling the connection itself is done.

use crate::event::{Event, EventType};
use crate::generator::GenState;
use crate::pool::Handle;
use crate::runtime::Runtime;

fn issue_call_done(rt: &Runtime, conn: Handle<crate::conn::Connection>) -> bool {
    let Some(c) = rt.connections.get(conn) else { return true };
    c.ncall_created + c.ncall_create_failed == rt.config.num_calls
}

/// One tick: draws the next item size (if sizes are distribution-driven),
/// builds a request and enqueues it, and stops the generator once
/// `num_calls` have been attempted on this connection.
pub fn tick(rt: &mut Runtime, conn: Handle<crate::conn::Connection>) {
    debug_assert!(!issue_call_done(rt, conn));

    rt.signal(Event::GenSizeTrigger);
    let value_len = rt.size_gen_current();
    let key_id = rt.next_key_id();
    let key = crate::codec::synthesize_key(&rt.config.key_prefix, key_id);
    let value_source = rt.value_buffer();

    let spec = crate::codec::RequestSpec {
        method: rt.config.method,
        key: &key,
        expiry: rt.config.expiry,
        arithmetic_delta: rt.config.arithmetic_delta,
        noreply: rt.config.noreply,
        value_len,
        value_source,
    };

    match crate::conn::issue_call(rt, conn, &spec) {
        Ok(_) => {}
        Err(e) => {
            if let Some(c) = rt.connections.get_mut(conn) {
                c.ncall_create_failed += 1;
            }
            tracing::warn!(error = %e, "failed to build a call request");
        }
    }

    if issue_call_done(rt, conn) {
        let Some(c) = rt.connections.get(conn) else { return };
        tracing::debug!(
            created = c.ncall_created,
            failed = c.ncall_create_failed,
            wanted = rt.config.num_calls,
            conn = conn.index(),
            "call generator has issued all planned calls on this connection"
        );
        if let Some(c) = rt.connections.get_mut(conn) {
            c.call_gen.state = GenState::Done;
        }
        let all_completed = rt.connections.get(conn).map(|c| c.ncall_completed == c.ncall_created).unwrap_or(true);
        if all_completed {
            crate::conn::destroy(rt, conn);
        }
    }
}

fn on_destroyed(rt: &mut Runtime, event: Event) {
    let Event::CallDestroyed(call_ref) = event else { return };
    let conn = call_ref.conn;
    let Some(c) = rt.connections.get_mut(conn) else { return };
    c.ncall_completed += 1;

    let done = issue_call_done(rt, conn);
    let all_completed = rt.connections.get(conn).map(|c| c.ncall_completed == c.ncall_created).unwrap_or(false);
    if done && all_completed {
        crate::conn::destroy(rt, conn);
        return;
    }

    let oneshot = rt.connections.get(conn).map(|c| c.call_gen.oneshot).unwrap_or(false);
    if oneshot {
        rt.signal(Event::GenCallFire(conn));
    }
}

fn on_trigger(rt: &mut Runtime, event: Event) {
    let Event::GenCallTrigger(conn) = event else { return };
    crate::runtime::start_call_generator(rt, conn);
}

fn on_fire(rt: &mut Runtime, event: Event) {
    let Event::GenCallFire(conn) = event else { return };
    let done = rt.connections.get(conn).map(|c| c.call_gen.is_done()).unwrap_or(true);
    if !done {
        tick(rt, conn);
    }
}

pub fn init(rt: &mut Runtime) {
    rt.bus.register(EventType::CallDestroyed, on_destroyed);
    rt.bus.register(EventType::GenCallTrigger, on_trigger);
    rt.bus.register(EventType::GenCallFire, on_fire);
}
