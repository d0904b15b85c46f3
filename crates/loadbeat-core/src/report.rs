//! Final statistics report, rendered once at the end of `run`.

use std::fmt::Write as _;

use crate::config::Config;
use crate::stats::{HISTOGRAM_BINS, Statistics};

impl Statistics {
    pub fn render(&self, config: &Config) -> String {
        let elapsed = loadbeat_timing::Instant::now().duration_since(self.start_time).as_secs_f64();
        let mut out = String::new();

        let _ = writeln!(out, "loadbeat report for {}:{}", config.server, config.port);
        let _ = writeln!(out, "elapsed {elapsed:.3}s");
        let _ = writeln!(
            out,
            "connections: created={} destroyed={} max_active={} connected={}",
            self.nconn_created, self.nconn_destroyed, self.nconn_active_max, self.nconnect
        );
        let _ = writeln!(
            out,
            "connect latency: mean={:.6}s min={:.6}s max={:.6}s",
            self.connect_latency.mean(),
            self.connect_latency.min,
            self.connect_latency.max
        );
        let _ = writeln!(
            out,
            "requests: n={} bytes_mean={:.1} rate={:.1}/s",
            self.nreq,
            self.req_bytes.mean(),
            rate(self.nreq, elapsed)
        );
        let _ = writeln!(
            out,
            "responses: n={} bytes_mean={:.1} rate={:.1}/s",
            self.nrsp,
            self.rsp_bytes.mean(),
            rate(self.nrsp, elapsed)
        );
        let _ = writeln!(
            out,
            "first-byte latency: mean={:.6}s min={:.6}s max={:.6}s",
            self.first_byte_latency.mean(),
            self.first_byte_latency.min,
            self.first_byte_latency.max
        );
        let _ = writeln!(out, "client timeouts: {}", self.nclient_timeout);
        let _ = writeln!(
            out,
            "socket errors: fd_unavail={} ftab_full={} addr_unavail={} refused={} reset={} timed_out={} other={}",
            self.socket_errors.fd_unavail,
            self.socket_errors.ftab_full,
            self.socket_errors.addr_unavail,
            self.socket_errors.refused,
            self.socket_errors.reset,
            self.socket_errors.sock_timedout,
            self.socket_errors.other
        );
        let _ = writeln!(
            out,
            "response types: stored={} not_stored={} exists={} not_found={} end={} value={} \
             deleted={} error={} client_error={} server_error={} num={}",
            self.rsp_types.stored,
            self.rsp_types.not_stored,
            self.rsp_types.exists,
            self.rsp_types.not_found,
            self.rsp_types.end,
            self.rsp_types.value,
            self.rsp_types.deleted,
            self.rsp_types.error,
            self.rsp_types.client_error,
            self.rsp_types.server_error,
            self.rsp_types.num
        );

        if config.print_histogram {
            let _ = writeln!(out, "latency histogram (ms : count), zero buckets omitted:");
            for (ms, &count) in self.latency_histogram.iter().enumerate().take(HISTOGRAM_BINS) {
                if count > 0 {
                    let _ = writeln!(out, "  {ms:>6} : {count}");
                }
            }
        }

        if let Some(rusage) = read_rusage() {
            let _ = writeln!(out, "cpu: user={:.3}s system={:.3}s", rusage.0, rusage.1);
        }

        out
    }
}

fn rate(n: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 { 0.0 } else { n as f64 / elapsed_secs }
}

/// Returns (user_secs, system_secs) from `getrusage(RUSAGE_SELF)`.
fn read_rusage() -> Option<(f64, f64)> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let to_secs = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some((to_secs(usage.ru_utime), to_secs(usage.ru_stime)))
}
