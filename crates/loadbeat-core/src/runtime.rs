//! The process-wide state the run loop threads through every subsystem:
//! the event bus, the timer wheel, the poller, the connection pool, and
//! the size distribution driving item sizes. Modelled as a single value
//! constructed in `main` rather than process-wide statics, so tests can
//! spin up an isolated instance per scenario.

use std::net::SocketAddr;

use loadbeat_net::Poller;

use crate::codec::MAX_VALUE_LEN;
use crate::config::Config;
use crate::conn::Connection;
use crate::distribution::Distribution;
use crate::error::RuntimeError;
use crate::event::{Event, EventBus, EventType};
use crate::generator::{GenState, GeneratorOwner, Generator, Pacing};
use crate::pool::{Handle, Pool};
use crate::stats::Statistics;
use crate::timer::{TimerAction, TimerWheel};

const POLL_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(1);

pub struct Runtime {
    pub config: Config,
    pub bus: EventBus,
    pub timers: TimerWheel,
    pub poller: Poller,
    pub connections: Pool<Connection>,
    pub conn_gen: Generator,
    pub stats: Statistics,
    size_dist: Distribution,
    value_buffer: Vec<u8>,
    pub nconn_created: u64,
    pub nconn_create_failed: u64,
    pub nconn_destroyed: u64,
    stopped: bool,
}

impl Runtime {
    pub fn new(config: Config) -> Result<Self, RuntimeError> {
        let poller = Poller::new(1024).map_err(RuntimeError::PollerInit)?;
        let size_dist = Distribution::new(config.size_dist, config.client_id);
        let conn_gen = Generator::fresh(
            Pacing::from_opt(config.conn_dist, config.client_id),
            GeneratorOwner::ConnGenerator,
        );

        Ok(Self {
            config,
            bus: EventBus::new(),
            timers: TimerWheel::new(),
            poller,
            connections: Pool::new(),
            conn_gen,
            stats: Statistics::new(),
            size_dist,
            value_buffer: vec![b'0'; MAX_VALUE_LEN],
            nconn_created: 0,
            nconn_create_failed: 0,
            nconn_destroyed: 0,
            stopped: false,
        })
    }

    pub fn target_addr(&self) -> SocketAddr {
        self.config.addr
    }

    pub fn request_stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn alloc_connection(&mut self) -> Option<Handle<Connection>> {
        let addr = self.config.addr;
        let handle_slot = self.connections.acquire(Connection::new(0, addr, placeholder_call_gen()));
        let id = handle_slot.index();
        if let Some(conn) = self.connections.get_mut(handle_slot) {
            conn.id = id;
            conn.call_gen =
                Generator::fresh(Pacing::from_opt(self.config.call_dist, self.config.client_id), GeneratorOwner::CallGenerator(handle_slot));
        }
        Some(handle_slot)
    }

    pub fn advance_size_distribution(&mut self) {
        self.size_dist.next();
    }

    pub fn size_gen_current(&self) -> usize {
        (self.size_dist.last_value().max(0.0) as usize).min(MAX_VALUE_LEN)
    }

    pub fn next_key_id(&self) -> u32 {
        self.size_dist.next_id()
    }

    pub fn value_buffer(&self) -> &[u8] {
        &self.value_buffer
    }
}

fn placeholder_call_gen() -> Generator {
    Generator::fresh(Pacing::Completion, GeneratorOwner::CallGenerator(Handle::from_raw(0, 0)))
}

/// Wires up every module's event-bus subscriptions. Call once before
/// [`run`].
pub fn init(rt: &mut Runtime) {
    crate::conn_generator::init(rt);
    crate::call_generator::init(rt);
    crate::size_generator::init(rt);
    crate::stats::init(rt);
}

/// Runs the connection-generator state machine exactly once up front
/// (per §4.6's "start calls tick inline" contract), then — if it isn't
/// already done — arms it for either timer-paced or completion-driven
/// advancement.
pub fn start_conn_generator(rt: &mut Runtime) {
    rt.conn_gen.state = GenState::Armed;
    crate::conn_generator::tick(rt);
    arm_conn_generator(rt);
}

fn arm_conn_generator(rt: &mut Runtime) {
    if rt.conn_gen.is_done() {
        return;
    }
    match rt.conn_gen.pacing {
        Pacing::Completion => {}
        Pacing::Timed(_) => {
            let delay = rt.conn_gen.next_delay();
            let handle = rt.timers.schedule(TimerAction::ConnGenTick, delay);
            rt.conn_gen.timer = Some(handle);
        }
    }
}

pub fn start_call_generator(rt: &mut Runtime, conn: Handle<Connection>) {
    if let Some(c) = rt.connections.get_mut(conn) {
        c.call_gen.state = GenState::Armed;
    }
    crate::call_generator::tick(rt, conn);
    arm_call_generator(rt, conn);
}

fn arm_call_generator(rt: &mut Runtime, conn: Handle<Connection>) {
    let Some(c) = rt.connections.get(conn) else { return };
    if c.call_gen.is_done() {
        return;
    }
    match c.call_gen.pacing {
        Pacing::Completion => {}
        Pacing::Timed(_) => {
            let delay = rt.connections.get_mut(conn).unwrap().call_gen.next_delay();
            let handle = rt.timers.schedule(TimerAction::CallGenTick { conn }, delay);
            rt.connections.get_mut(conn).unwrap().call_gen.timer = Some(handle);
        }
    }
}

fn dispatch_timer(rt: &mut Runtime, action: TimerAction) {
    match action {
        TimerAction::ConnGenTick => {
            if !rt.conn_gen.is_done() {
                crate::conn_generator::tick(rt);
                arm_conn_generator(rt);
            }
        }
        TimerAction::CallGenTick { conn } => {
            let done = rt.connections.get(conn).map(|c| c.call_gen.is_done()).unwrap_or(true);
            if !done {
                crate::call_generator::tick(rt, conn);
                arm_call_generator(rt, conn);
            }
        }
        TimerAction::ConnectWatchdog { conn } => {
            rt.signal(Event::ConnTimeout(conn));
            crate::conn::fail(rt, conn, crate::conn::FailReason::Timeout);
        }
        TimerAction::ResponseWatchdog { conn } => {
            crate::conn::on_response_timeout(rt, conn);
        }
    }
}

/// The top-level run loop (§4.11): tick the timer wheel, wait on the
/// poller for up to one wheel tick, dispatch ready sockets, tick the
/// wheel again to absorb slippage accrued while dispatching. Exits once
/// the connection generator reports every planned connection has been
/// both created (or failed to be) and torn down.
pub fn run(rt: &mut Runtime) -> Result<(), RuntimeError> {
    init(rt);

    if rt.config.num_conns == 0 {
        return Ok(());
    }

    rt.signal(Event::GenConnTrigger);

    while !rt.is_stopped() {
        for action in rt.timers.tick() {
            dispatch_timer(rt, action);
        }

        rt.poller.wait(Some(POLL_TIMEOUT)).map_err(RuntimeError::PollerInit)?;
        let ready: Vec<_> = rt.poller.ready().collect();
        for (token, readiness) in ready {
            let Some(handle) = rt.connections.get_by_index(token.0 as u32) else { continue };
            let Some(conn) = rt.connections.get(handle) else { continue };
            let (connecting, has_stream) = (!conn.is_connected(), conn.stream().is_some());

            if readiness.error {
                crate::conn::fail(rt, handle, crate::conn::FailReason::Socket(loadbeat_net::SocketErrorKind::Other));
                continue;
            }
            if connecting && has_stream {
                crate::conn::on_connect_writable(rt, handle);
                continue;
            }
            if readiness.writable {
                crate::conn::drive_send(rt, handle);
            }
            if readiness.readable {
                crate::conn::drive_recv(rt, handle);
            }
        }

        for action in rt.timers.tick() {
            dispatch_timer(rt, action);
        }
    }

    Ok(())
}
