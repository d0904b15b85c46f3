//! Connection state machine: connect, drain a send queue, drain a recv
//! queue, tear down. Calls are owned by their connection's own [`Pool`] —
//! a [`Handle<Call>`] is only ever interpreted relative to the connection
//! that produced it (see [`crate::call::CallRef`]).

use std::collections::VecDeque;
use std::net::SocketAddr;

use loadbeat_net::{SocketErrorKind, TcpStream};
use loadbeat_timing::{Duration, Instant};

use crate::call::{Call, CallRef, CallState};
use crate::codec::{self, LineOutcome, RecvBuffer, RspTag};
use crate::error::ProtocolError;
use crate::event::Event;
use crate::generator::Generator;
use crate::pool::{Handle, Pool};
use crate::runtime::Runtime;
use crate::timer::TimerHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailReason {
    Socket(SocketErrorKind),
    Timeout,
    ProtocolError(ProtocolError),
    PeerClosed,
}

pub struct Connection {
    pub id: u32,
    pub addr: SocketAddr,
    stream: Option<TcpStream>,
    calls: Pool<Call>,
    send_queue: VecDeque<Handle<Call>>,
    recv_queue: VecDeque<Handle<Call>>,
    recv_buf: RecvBuffer,
    pub call_gen: Generator,
    watchdog: Option<TimerHandle>,
    connect_start: Instant,
    pub ncall_created: u64,
    pub ncall_create_failed: u64,
    pub ncall_completed: u64,
    connecting: bool,
    connected: bool,
    eof: bool,
    last_error: Option<SocketErrorKind>,
}

impl Connection {
    pub fn new(id: u32, addr: SocketAddr, call_gen: Generator) -> Self {
        Self {
            id,
            addr,
            stream: None,
            calls: Pool::new(),
            send_queue: VecDeque::new(),
            recv_queue: VecDeque::new(),
            recv_buf: RecvBuffer::new(),
            call_gen,
            watchdog: None,
            connect_start: Instant::now(),
            ncall_created: 0,
            ncall_create_failed: 0,
            ncall_completed: 0,
            connecting: false,
            connected: false,
            eof: false,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    pub fn has_outstanding_calls(&self) -> bool {
        !self.send_queue.is_empty() || !self.recv_queue.is_empty()
    }

    pub fn connect_started_at(&self) -> Instant {
        self.connect_start
    }

    pub fn last_socket_error(&self) -> Option<SocketErrorKind> {
        self.last_error
    }

    pub fn call(&self, handle: Handle<Call>) -> Option<&Call> {
        self.calls.get(handle)
    }

    fn queue_request(&mut self, buf: Vec<u8>, noreply: bool) -> Handle<Call> {
        let id = self.ncall_created;
        self.ncall_created += 1;
        let call = self.calls.acquire(Call::new(id, buf, noreply));
        if let Some(c) = self.calls.get_mut(call) {
            c.state = CallState::OnSendQueue;
        }
        self.send_queue.push_back(call);
        call
    }
}

/// Initiates a nonblocking connect and registers the socket with the
/// poller for write-readiness (connect completion is signalled by the
/// socket becoming writable).
pub fn connect(rt: &mut Runtime, handle: Handle<Connection>, timeout: Duration) {
    let conn = rt.connections.get_mut(handle).expect("connect on a released connection");
    conn.connect_start = Instant::now();
    conn.connecting = true;

    match loadbeat_net::connect_nonblocking(conn.addr) {
        Ok(mut stream) => {
            let _ = loadbeat_net::set_tcp_nodelay(&stream, !rt.config.disable_nodelay);
            rt.poller.add_write(&mut stream, mio::Token(handle.index() as usize), false).ok();
            conn.stream = Some(stream);
            if !timeout.is_zero() {
                let wd = rt.timers.schedule(
                    crate::timer::TimerAction::ConnectWatchdog { conn: handle },
                    timeout,
                );
                rt.connections.get_mut(handle).unwrap().watchdog = Some(wd);
            }
            rt.signal(Event::ConnConnecting(handle));
        }
        Err(e) => {
            let kind = e.raw_os_error().map(loadbeat_net::classify_errno).unwrap_or(SocketErrorKind::Other);
            fail(rt, handle, FailReason::Socket(kind));
        }
    }
}

/// Called when the poller reports the connecting socket has become
/// writable: checks `SO_ERROR` to distinguish a completed connect from a
/// failed one.
pub fn on_connect_writable(rt: &mut Runtime, handle: Handle<Connection>) {
    let conn = rt.connections.get_mut(handle).expect("writable event for a released connection");
    let Some(stream) = conn.stream.as_ref() else { return };
    let errno = match loadbeat_net::take_socket_error(std::os::fd::AsRawFd::as_raw_fd(stream)) {
        Ok(errno) => errno,
        Err(_) => {
            fail(rt, handle, FailReason::Socket(SocketErrorKind::Other));
            return;
        }
    };

    if errno != 0 {
        let kind = loadbeat_net::classify_errno(errno);
        fail(rt, handle, FailReason::Socket(kind));
        return;
    }

    if let Some(wd) = conn.watchdog.take() {
        rt.timers.cancel(wd);
    }
    conn.connecting = false;
    conn.connected = true;
    rt.signal(Event::ConnConnected(handle));
    rt.signal(Event::GenCallTrigger(handle));
}

/// Builds a request from `spec` and enqueues it on `handle`'s send queue,
/// arming write-readiness if the queue was empty.
pub fn issue_call(
    rt: &mut Runtime,
    handle: Handle<Connection>,
    spec: &codec::RequestSpec<'_>,
) -> Result<CallRef, crate::error::ConfigError> {
    let buf = codec::build_request(spec)?;
    let conn = rt.connections.get_mut(handle).expect("issue_call on a released connection");
    let was_idle = conn.send_queue.is_empty();
    let call_h = conn.queue_request(buf, spec.noreply);
    let call_ref = CallRef { conn: handle, call: call_h };
    rt.signal(Event::CallIssueStart(call_ref));

    if was_idle {
        let conn = rt.connections.get_mut(handle).expect("issue_call on a released connection");
        if let Some(stream) = conn.stream.as_mut() {
            rt.poller.add_write(stream, mio::Token(handle.index() as usize), true).ok();
        }
    }
    Ok(call_ref)
}

/// Drains as much of the send queue as the socket will currently accept.
pub fn drive_send(rt: &mut Runtime, handle: Handle<Connection>) {
    loop {
        let conn = rt.connections.get_mut(handle).expect("drive_send on a released connection");
        let Some(&call_h) = conn.send_queue.front() else {
            if let Some(stream) = conn.stream.as_mut() {
                rt.poller.del_write(stream, mio::Token(handle.index() as usize), true).ok();
            }
            return;
        };
        let Some(stream) = conn.stream.as_mut() else { return };

        let needs_start_signal = conn.calls.get(call_h).unwrap().req.send_start.is_none();
        if needs_start_signal {
            conn.calls.get_mut(call_h).unwrap().req.send_start = Some(Instant::now());
            rt.signal(Event::CallSendStart(CallRef { conn: handle, call: call_h }));
        }

        let conn = rt.connections.get_mut(handle).unwrap();
        let stream = conn.stream.as_mut().unwrap();
        let call = conn.calls.get_mut(call_h).unwrap();
        match std::io::Write::write(stream, call.req.remaining()) {
            Ok(0) => {
                fail(rt, handle, FailReason::PeerClosed);
                return;
            }
            Ok(n) => {
                call.req.sent += n;
                if call.req.is_fully_sent() {
                    call.req.send_stop = Some(Instant::now());
                    call.state = CallState::OnRecvQueue;
                    let noreply = call.req.noreply;
                    let call_ref = CallRef { conn: handle, call: call_h };
                    conn.send_queue.pop_front();
                    rt.signal(Event::CallSendStop(call_ref));

                    let conn = rt.connections.get_mut(handle).unwrap();
                    if noreply {
                        finish_call(rt, handle, call_h);
                    } else {
                        conn.recv_queue.push_back(call_h);
                        let was_idle_recv = conn.recv_queue.len() == 1;
                        if was_idle_recv {
                            if let Some(stream) = conn.stream.as_mut() {
                                rt.poller.add(stream, mio::Token(handle.index() as usize)).ok();
                            }
                            rearm_response_watchdog(rt, handle);
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) => {
                let kind = e.raw_os_error().map(loadbeat_net::classify_errno).unwrap_or(SocketErrorKind::Other);
                fail(rt, handle, FailReason::Socket(kind));
                return;
            }
        }
    }
}

/// Drains readable bytes, feeding them through the codec's two-phase
/// line/body parser and matching completed responses against the head of
/// the recv queue.
pub fn drive_recv(rt: &mut Runtime, handle: Handle<Connection>) {
    loop {
        let conn = rt.connections.get_mut(handle).expect("drive_recv on a released connection");
        let Some(stream) = conn.stream.as_mut() else { return };
        let tail = conn.recv_buf.writable_tail();
        if tail.is_empty() {
            fail(rt, handle, FailReason::ProtocolError(ProtocolError::UnexpectedSpillover));
            return;
        }

        match std::io::Read::read(stream, tail) {
            Ok(0) => {
                let outstanding = conn.has_outstanding_calls();
                conn.eof = true;
                if outstanding {
                    fail(rt, handle, FailReason::PeerClosed);
                } else {
                    destroy(rt, handle);
                }
                return;
            }
            Ok(n) => {
                conn.recv_buf.advance_filled(n);
                if !pump_responses(rt, handle) {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) => {
                let kind = e.raw_os_error().map(loadbeat_net::classify_errno).unwrap_or(SocketErrorKind::Other);
                fail(rt, handle, FailReason::Socket(kind));
                return;
            }
        }
    }
}

/// Consumes as many complete responses as are buffered. Returns `false`
/// if the connection failed partway through (so the caller must stop
/// touching it).
fn pump_responses(rt: &mut Runtime, handle: Handle<Connection>) -> bool {
    loop {
        let conn = rt.connections.get_mut(handle).unwrap();
        let Some(&call_h) = conn.recv_queue.front() else { return true };
        let call = conn.calls.get_mut(call_h).unwrap();
        if call.rsp.recv_start.is_none() {
            call.rsp.recv_start = Some(Instant::now());
            let call_ref = CallRef { conn: handle, call: call_h };
            rt.signal(Event::CallRecvStart(call_ref));
        }

        let conn = rt.connections.get_mut(handle).unwrap();
        if conn.recv_buf.unparsed().is_empty() {
            return true;
        }

        if conn.calls.get(call_h).unwrap().rsp.tag.is_none() {
            match codec::scan_line(conn.recv_buf.unparsed()) {
                LineOutcome::NeedMore => return true,
                LineOutcome::Error(e) => {
                    fail(rt, handle, FailReason::ProtocolError(e));
                    return false;
                }
                LineOutcome::Line { tag, line_len } => {
                    if tag == RspTag::Value {
                        let line = conn.recv_buf.unparsed()[..line_len - 2].to_vec();
                        let header = &line[b"VALUE ".len()..];
                        match codec::parse_value_header(header) {
                            Ok(remaining) => {
                                conn.recv_buf.advance_parsed(line_len);
                                let call = conn.calls.get_mut(call_h).unwrap();
                                call.rsp.tag = Some(tag);
                                call.rsp.value_remaining = remaining;
                                call.rsp.rcvd += line_len;
                            }
                            Err(e) => {
                                fail(rt, handle, FailReason::ProtocolError(e));
                                return false;
                            }
                        }
                    } else {
                        conn.recv_buf.advance_parsed(line_len);
                        let call = conn.calls.get_mut(call_h).unwrap();
                        call.rsp.tag = Some(tag);
                        call.rsp.value_remaining = 0;
                        call.rsp.rcvd += line_len;
                    }
                }
            }
        }

        let conn = rt.connections.get_mut(handle).unwrap();
        let call = conn.calls.get_mut(call_h).unwrap();
        if call.rsp.value_remaining > 0 {
            let avail = conn.recv_buf.unparsed().len().min(call.rsp.value_remaining);
            conn.recv_buf.advance_parsed(avail);
            let call = conn.calls.get_mut(call_h).unwrap();
            call.rsp.value_remaining -= avail;
            call.rsp.rcvd += avail;
            if call.rsp.value_remaining > 0 {
                return true;
            }
        }

        let call_ref = CallRef { conn: handle, call: call_h };
        conn.recv_queue.pop_front();
        rt.signal(Event::CallRecvStop(call_ref));
        finish_call(rt, handle, call_h);
        rearm_response_watchdog(rt, handle);
    }
}

fn finish_call(rt: &mut Runtime, handle: Handle<Connection>, call_h: Handle<Call>) {
    let conn = rt.connections.get_mut(handle).unwrap();
    conn.calls.release(call_h);
    let call_ref = CallRef { conn: handle, call: call_h };
    rt.signal(Event::CallDestroyed(call_ref));
}

/// Cancels any existing watchdog and arms a fresh one against the
/// current recv-queue head's remaining time budget, or leaves the
/// connection unarmed if the queue is empty or no timeout is configured.
fn rearm_response_watchdog(rt: &mut Runtime, handle: Handle<Connection>) {
    if rt.config.connect_timeout.is_zero() {
        return;
    }
    let Some(conn) = rt.connections.get_mut(handle) else { return };
    if let Some(wd) = conn.watchdog.take() {
        rt.timers.cancel(wd);
    }
    let conn = rt.connections.get(handle).unwrap();
    let Some(&head) = conn.recv_queue.front() else { return };
    let Some(send_stop) = conn.calls.get(head).and_then(|c| c.req.send_stop) else { return };
    let elapsed = Instant::now().duration_since(send_stop);
    let remaining = rt.config.connect_timeout.saturating_sub(elapsed);
    let wd = rt.timers.schedule(crate::timer::TimerAction::ResponseWatchdog { conn: handle }, remaining);
    rt.connections.get_mut(handle).unwrap().watchdog = Some(wd);
}

/// Fires the response watchdog: if there's still a call at the head of
/// the recv queue, this is a genuine client-side timeout.
pub fn on_response_timeout(rt: &mut Runtime, handle: Handle<Connection>) {
    if let Some(conn) = rt.connections.get_mut(handle) {
        conn.watchdog = None; // the wheel already freed the slot that fired
    }
    let outstanding = rt.connections.get(handle).map(Connection::has_outstanding_calls).unwrap_or(false);
    if outstanding {
        rt.signal(Event::ConnTimeout(handle));
        fail(rt, handle, FailReason::Timeout);
    }
}

/// Tears the connection down on any hard failure: cancels outstanding
/// timers, signals `ConnFailed`, then destroys it.
pub fn fail(rt: &mut Runtime, handle: Handle<Connection>, reason: FailReason) {
    if let Some(conn) = rt.connections.get_mut(handle) {
        if let FailReason::Socket(kind) = reason {
            conn.last_error = Some(kind);
        }
    }
    rt.signal(Event::ConnFailed(handle));
    destroy(rt, handle);
}

/// Releases the connection's socket and its own call pool back to the
/// runtime. Calls this connection never got a reply for are counted as
/// failed, not completed. Subscribers (e.g. the statistics collector) are
/// signalled before the pool slot is released, so `rt.connections.get`
/// still resolves the handle they were just handed.
pub fn destroy(rt: &mut Runtime, handle: Handle<Connection>) {
    if let Some(conn) = rt.connections.get_mut(handle) {
        if let Some(wd) = conn.watchdog.take() {
            rt.timers.cancel(wd);
        }
        if let Some(mut stream) = conn.stream.take() {
            rt.poller.del(&mut stream).ok();
        }
        conn.ncall_create_failed += (conn.send_queue.len() + conn.recv_queue.len()) as u64;
        conn.send_queue.clear();
        conn.recv_queue.clear();
    }
    rt.signal(Event::ConnDestroyed(handle));
    rt.connections.release(handle);
}
