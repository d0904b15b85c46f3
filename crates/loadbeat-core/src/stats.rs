//! Two collectors, subscribed on the event bus at startup, that turn
//! lifecycle events into the aggregate counters the final report reads.
//! Neither the connection nor the call state machine carries any
//! statistics logic itself — everything here is derived from events.

use loadbeat_net::SocketErrorKind;
use loadbeat_timing::Duration;

use crate::codec::RspTag;
use crate::event::{Event, EventType};
use crate::runtime::Runtime;

pub const HISTOGRAM_BINS: usize = 100_000;
const HISTOGRAM_BIN_WIDTH_MS: f64 = 1.0;

#[derive(Default, Clone, Copy)]
pub struct Accumulator {
    pub n: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub min: f64,
    pub max: f64,
}

impl Accumulator {
    pub fn observe(&mut self, value: f64) {
        if self.n == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.n += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.sum / self.n as f64 }
    }
}

#[derive(Default)]
pub struct SocketErrorCounts {
    pub fd_unavail: u64,
    pub ftab_full: u64,
    pub addr_unavail: u64,
    pub refused: u64,
    pub reset: u64,
    pub sock_timedout: u64,
    pub other: u64,
}

impl SocketErrorCounts {
    fn bump(&mut self, kind: SocketErrorKind) {
        match kind {
            SocketErrorKind::FdUnavailable => self.fd_unavail += 1,
            SocketErrorKind::FileTableFull => self.ftab_full += 1,
            SocketErrorKind::AddrUnavailable => self.addr_unavail += 1,
            SocketErrorKind::Refused => self.refused += 1,
            SocketErrorKind::Reset => self.reset += 1,
            SocketErrorKind::TimedOut => self.sock_timedout += 1,
            SocketErrorKind::Other => self.other += 1,
        }
    }
}

#[derive(Default)]
pub struct RspTypeCounts {
    pub stored: u64,
    pub not_stored: u64,
    pub exists: u64,
    pub not_found: u64,
    pub end: u64,
    pub value: u64,
    pub deleted: u64,
    pub error: u64,
    pub client_error: u64,
    pub server_error: u64,
    pub num: u64,
}

impl RspTypeCounts {
    fn bump(&mut self, tag: RspTag) {
        match tag {
            RspTag::Stored => self.stored += 1,
            RspTag::NotStored => self.not_stored += 1,
            RspTag::Exists => self.exists += 1,
            RspTag::NotFound => self.not_found += 1,
            RspTag::End => self.end += 1,
            RspTag::Value => self.value += 1,
            RspTag::Deleted => self.deleted += 1,
            RspTag::Error => self.error += 1,
            RspTag::ClientError => self.client_error += 1,
            RspTag::ServerError => self.server_error += 1,
            RspTag::Num => self.num += 1,
        }
    }
}

pub struct Statistics {
    pub start_time: loadbeat_timing::Instant,
    pub nconn_created: u64,
    pub nconn_destroyed: u64,
    pub nconn_active_max: u64,
    pub nconnect_issued: u64,
    pub nconnect: u64,
    pub connect_latency: Accumulator,
    pub conn_lifetime: Accumulator,
    pub socket_errors: SocketErrorCounts,
    pub nclient_timeout: u64,
    pub nreq: u64,
    pub req_bytes: Accumulator,
    pub send_duration: Accumulator,
    pub nrsp: u64,
    pub rsp_bytes: Accumulator,
    pub first_byte_latency: Accumulator,
    pub latency_histogram: Box<[u64; HISTOGRAM_BINS]>,
    pub rsp_types: RspTypeCounts,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            start_time: loadbeat_timing::Instant::now(),
            nconn_created: 0,
            nconn_destroyed: 0,
            nconn_active_max: 0,
            nconnect_issued: 0,
            nconnect: 0,
            connect_latency: Accumulator::default(),
            conn_lifetime: Accumulator::default(),
            socket_errors: SocketErrorCounts::default(),
            nclient_timeout: 0,
            nreq: 0,
            req_bytes: Accumulator::default(),
            send_duration: Accumulator::default(),
            nrsp: 0,
            rsp_bytes: Accumulator::default(),
            first_byte_latency: Accumulator::default(),
            latency_histogram: Box::new([0u64; HISTOGRAM_BINS]),
            rsp_types: RspTypeCounts::default(),
        }
    }

    fn bucket_latency(&mut self, latency: Duration) {
        let ms = latency.as_millis_f64() / HISTOGRAM_BIN_WIDTH_MS;
        let bucket = (ms.floor() as i64).clamp(0, (HISTOGRAM_BINS - 1) as i64) as usize;
        self.latency_histogram[bucket] += 1;
    }

    pub fn active_connections(&self) -> u64 {
        self.nconn_created.saturating_sub(self.nconn_destroyed)
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

fn on_conn_event(rt: &mut Runtime, event: Event) {
    match event {
        Event::ConnCreated(_) => {
            rt.stats.nconn_created += 1;
            rt.stats.nconn_active_max = rt.stats.nconn_active_max.max(rt.stats.active_connections());
        }
        Event::ConnConnecting(_) => {
            rt.stats.nconnect_issued += 1;
        }
        Event::ConnConnected(handle) => {
            rt.stats.nconnect += 1;
            if let Some(c) = rt.connections.get(handle) {
                let latency = loadbeat_timing::Instant::now().duration_since(c.connect_started_at());
                rt.stats.connect_latency.observe(latency.as_secs_f64());
            }
        }
        Event::ConnTimeout(_) => {
            rt.stats.nclient_timeout += 1;
        }
        Event::ConnFailed(handle) => {
            if let Some(c) = rt.connections.get(handle) {
                if let Some(kind) = c.last_socket_error() {
                    rt.stats.socket_errors.bump(kind);
                }
            }
        }
        Event::ConnDestroyed(handle) => {
            rt.stats.nconn_destroyed += 1;
            if let Some(c) = rt.connections.get(handle) {
                let lifetime = loadbeat_timing::Instant::now().duration_since(c.connect_started_at());
                rt.stats.conn_lifetime.observe(lifetime.as_secs_f64());
            }
        }
        _ => {}
    }
}

fn on_call_event(rt: &mut Runtime, event: Event) {
    match event {
        Event::CallSendStop(call_ref) => {
            let Some(conn) = rt.connections.get(call_ref.conn) else { return };
            let Some(call) = conn.call(call_ref.call) else { return };
            rt.stats.nreq += 1;
            rt.stats.req_bytes.observe(call.req.to_send() as f64);
            if let (Some(start), Some(stop)) = (call.req.send_start, call.req.send_stop) {
                rt.stats.send_duration.observe(stop.duration_since(start).as_secs_f64());
            }
        }
        Event::CallRecvStop(call_ref) => {
            let Some(conn) = rt.connections.get(call_ref.conn) else { return };
            let Some(call) = conn.call(call_ref.call) else { return };
            rt.stats.nrsp += 1;
            rt.stats.rsp_bytes.observe(call.rsp.rcvd as f64);
            if let Some(tag) = call.rsp.tag {
                rt.stats.rsp_types.bump(tag);
            }
            if let (Some(send_stop), Some(recv_start)) = (call.req.send_stop, call.rsp.recv_start) {
                let latency = recv_start.duration_since(send_stop);
                rt.stats.first_byte_latency.observe(latency.as_secs_f64());
                rt.stats.bucket_latency(latency);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_tracks_min_max_mean() {
        let mut acc = Accumulator::default();
        acc.observe(1.0);
        acc.observe(3.0);
        acc.observe(2.0);
        assert_eq!(acc.n, 3);
        assert_eq!(acc.min, 1.0);
        assert_eq!(acc.max, 3.0);
        assert_eq!(acc.mean(), 2.0);
    }

    #[test]
    fn empty_accumulator_has_zero_mean() {
        assert_eq!(Accumulator::default().mean(), 0.0);
    }

    #[test]
    fn socket_error_counts_bump_the_right_bucket() {
        let mut counts = SocketErrorCounts::default();
        counts.bump(SocketErrorKind::Refused);
        counts.bump(SocketErrorKind::Refused);
        counts.bump(SocketErrorKind::TimedOut);
        assert_eq!(counts.refused, 2);
        assert_eq!(counts.sock_timedout, 1);
        assert_eq!(counts.other, 0);
    }

    #[test]
    fn rsp_type_counts_bump_the_right_bucket() {
        let mut counts = RspTypeCounts::default();
        counts.bump(RspTag::Stored);
        counts.bump(RspTag::Value);
        counts.bump(RspTag::Value);
        assert_eq!(counts.stored, 1);
        assert_eq!(counts.value, 2);
    }

    #[test]
    fn latency_lands_in_the_matching_millisecond_bucket() {
        let mut stats = Statistics::new();
        stats.bucket_latency(Duration::from_secs_f64(0.010));
        assert_eq!(stats.latency_histogram[10], 1);
    }

    #[test]
    fn latency_beyond_the_histogram_range_clamps_to_the_top_bucket() {
        let mut stats = Statistics::new();
        stats.bucket_latency(Duration::from_secs_f64(1000.0));
        assert_eq!(stats.latency_histogram[HISTOGRAM_BINS - 1], 1);
    }

    #[test]
    fn active_connections_is_created_minus_destroyed() {
        let mut stats = Statistics::new();
        stats.nconn_created = 5;
        stats.nconn_destroyed = 2;
        assert_eq!(stats.active_connections(), 3);
    }
}

pub fn init(rt: &mut Runtime) {
    for ty in [
        EventType::ConnCreated,
        EventType::ConnConnecting,
        EventType::ConnConnected,
        EventType::ConnDestroyed,
        EventType::ConnTimeout,
        EventType::ConnFailed,
    ] {
        rt.bus.register(ty, on_conn_event);
    }
    for ty in [EventType::CallSendStop, EventType::CallRecvStop] {
        rt.bus.register(ty, on_call_event);
    }
}
