//! Synchronous publish/subscribe of typed lifecycle events. Subscribers are
//! plain `fn(&mut Runtime, Event)` pointers (not boxed closures) — the
//! reference implementation's callback table is a small, closed set fixed
//! at startup, so a bare fn pointer plus the event's own inline payload
//! covers everything an opaque `void*` + registration argument used to,
//! without the lifetime headaches of a self-referential closure over the
//! runtime it is itself stored inside of.

use loadbeat_utils::ArrayVec;

use crate::call::CallRef;
use crate::conn::Connection;
use crate::pool::Handle;
use crate::runtime::Runtime;

pub const MAX_SUBSCRIBERS_PER_EVENT: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum EventType {
    ConnCreated = 0,
    ConnConnecting,
    ConnConnected,
    ConnFailed,
    ConnTimeout,
    ConnDestroyed,
    CallIssueStart,
    CallSendStart,
    CallSendStop,
    CallRecvStart,
    CallRecvStop,
    CallDestroyed,
    GenConnTrigger,
    GenConnFire,
    GenCallTrigger,
    GenCallFire,
    GenSizeTrigger,
    GenSizeFire,
}

pub const EVENT_TYPE_COUNT: usize = EventType::GenSizeFire as usize + 1;

#[derive(Clone, Copy, Debug)]
pub enum Event {
    ConnCreated(Handle<Connection>),
    ConnConnecting(Handle<Connection>),
    ConnConnected(Handle<Connection>),
    ConnFailed(Handle<Connection>),
    ConnTimeout(Handle<Connection>),
    ConnDestroyed(Handle<Connection>),
    CallIssueStart(CallRef),
    CallSendStart(CallRef),
    CallSendStop(CallRef),
    CallRecvStart(CallRef),
    CallRecvStop(CallRef),
    CallDestroyed(CallRef),
    GenConnTrigger,
    GenConnFire,
    GenCallTrigger(Handle<Connection>),
    GenCallFire(Handle<Connection>),
    GenSizeTrigger,
    GenSizeFire,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::ConnCreated(_) => EventType::ConnCreated,
            Event::ConnConnecting(_) => EventType::ConnConnecting,
            Event::ConnConnected(_) => EventType::ConnConnected,
            Event::ConnFailed(_) => EventType::ConnFailed,
            Event::ConnTimeout(_) => EventType::ConnTimeout,
            Event::ConnDestroyed(_) => EventType::ConnDestroyed,
            Event::CallIssueStart(_) => EventType::CallIssueStart,
            Event::CallSendStart(_) => EventType::CallSendStart,
            Event::CallSendStop(_) => EventType::CallSendStop,
            Event::CallRecvStart(_) => EventType::CallRecvStart,
            Event::CallRecvStop(_) => EventType::CallRecvStop,
            Event::CallDestroyed(_) => EventType::CallDestroyed,
            Event::GenConnTrigger => EventType::GenConnTrigger,
            Event::GenConnFire => EventType::GenConnFire,
            Event::GenCallTrigger(_) => EventType::GenCallTrigger,
            Event::GenCallFire(_) => EventType::GenCallFire,
            Event::GenSizeTrigger => EventType::GenSizeTrigger,
            Event::GenSizeFire => EventType::GenSizeFire,
        }
    }
}

pub type Callback = fn(&mut Runtime, Event);

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<ArrayVec<Callback, MAX_SUBSCRIBERS_PER_EVENT>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: (0..EVENT_TYPE_COUNT).map(|_| ArrayVec::new()).collect() }
    }

    /// Registers `cb` for `ty`, de-duplicated by function-pointer identity.
    /// Exceeding the per-type cap is a startup-time programming error, not
    /// a runtime condition to recover from, so this panics rather than
    /// threading a `Result` through every subscriber's `init`.
    pub fn register(&mut self, ty: EventType, cb: Callback) {
        let subs = &mut self.subscribers[ty as usize];
        if subs.iter().any(|existing| std::ptr::fn_addr_eq(*existing, cb)) {
            return;
        }
        assert!(
            !subs.is_full(),
            "attempted to register more than {MAX_SUBSCRIBERS_PER_EVENT} callbacks for event {ty:?}"
        );
        subs.push(cb);
    }

    fn subscribers_of(&self, ty: EventType) -> ArrayVec<Callback, MAX_SUBSCRIBERS_PER_EVENT> {
        self.subscribers[ty as usize]
    }
}

impl Runtime {
    /// Signals `event` in registration order. Subscribers are copied out
    /// first (an `ArrayVec` of fn pointers is a handful of bytes) so each
    /// callback can take `&mut Runtime` without the bus borrowing itself.
    pub fn signal(&mut self, event: Event) {
        let ty = event.event_type();
        let subs = self.bus.subscribers_of(ty);
        for cb in subs.iter() {
            cb(self, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_a(_rt: &mut Runtime, _event: Event) {}
    fn noop_b(_rt: &mut Runtime, _event: Event) {}

    #[test]
    fn registration_is_deduplicated_by_fn_pointer() {
        let mut bus = EventBus::new();
        bus.register(EventType::ConnCreated, noop_a);
        bus.register(EventType::ConnCreated, noop_a);
        assert_eq!(bus.subscribers_of(EventType::ConnCreated).len(), 1);
    }

    #[test]
    fn distinct_callbacks_both_register() {
        let mut bus = EventBus::new();
        bus.register(EventType::ConnCreated, noop_a);
        bus.register(EventType::ConnCreated, noop_b);
        assert_eq!(bus.subscribers_of(EventType::ConnCreated).len(), 2);
    }

    #[test]
    #[should_panic(expected = "more than")]
    fn exceeding_the_subscriber_cap_panics() {
        let mut bus = EventBus::new();
        fn cb0(_: &mut Runtime, _: Event) {}
        fn cb1(_: &mut Runtime, _: Event) {}
        fn cb2(_: &mut Runtime, _: Event) {}
        fn cb3(_: &mut Runtime, _: Event) {}
        fn cb4(_: &mut Runtime, _: Event) {}
        bus.register(EventType::ConnCreated, cb0);
        bus.register(EventType::ConnCreated, cb1);
        bus.register(EventType::ConnCreated, cb2);
        bus.register(EventType::ConnCreated, cb3);
        bus.register(EventType::ConnCreated, cb4);
    }

    #[test]
    fn event_type_matches_its_variant() {
        assert_eq!(Event::GenConnTrigger.event_type(), EventType::GenConnTrigger);
        assert_eq!(Event::GenSizeFire.event_type(), EventType::GenSizeFire);
    }
}
