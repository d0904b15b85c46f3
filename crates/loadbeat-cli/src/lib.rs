//! Command-line surface for `loadbeat`: a `clap` derive struct mirroring
//! the external interface in the design notes, plus the glue that turns
//! parsed arguments into a validated [`loadbeat_core::Config`].

use clap::Parser;
use loadbeat_core::config::ConfigSpec;
use loadbeat_core::error::ConfigError;
use loadbeat_core::Config;

/// A memcached ASCII-protocol load generator.
#[derive(Parser, Debug)]
#[command(name = "loadbeat", version, about, long_about = None)]
pub struct Cli {
    /// Target server host.
    #[arg(long, default_value = "127.0.0.1")]
    pub server: String,

    /// Target server port.
    #[arg(long, default_value_t = 11211)]
    pub port: u16,

    /// Log verbosity: 0 = warn, 1 = info, 2 = debug, 3+ = trace.
    #[arg(short = 'v', long, default_value_t = 0)]
    pub verbosity: u8,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub output: Option<String>,

    /// Per-call connect/response watchdog, in seconds. 0 disables it.
    #[arg(long, default_value_t = 5.0)]
    pub timeout: f64,

    /// SO_LINGER value in seconds, if set.
    #[arg(long)]
    pub linger: Option<i32>,

    /// SO_SNDBUF override, in bytes.
    #[arg(long)]
    pub send_buffer: Option<usize>,

    /// SO_RCVBUF override, in bytes.
    #[arg(long)]
    pub recv_buffer: Option<usize>,

    /// Disable TCP_NODELAY (i.e. allow Nagle's algorithm).
    #[arg(long, default_value_t = false)]
    pub disable_nodelay: bool,

    /// Request method: get, gets, delete, set, add, replace, append,
    /// prepend, cas, incr, decr.
    #[arg(long, default_value = "set")]
    pub method: String,

    /// Expiry seconds attached to storage commands.
    #[arg(long, default_value_t = 0)]
    pub expiry: u32,

    /// Delta attached to incr/decr commands.
    #[arg(long, default_value_t = 1)]
    pub arithmetic_delta: u64,

    /// Append `noreply` to storage/delete/arithmetic commands.
    #[arg(long, default_value_t = false)]
    pub noreply: bool,

    /// Key prefix (at most 16 bytes); keys are `<prefix><8 hex digits>`.
    #[arg(long, default_value = "loadbeat:")]
    pub key_prefix: String,

    /// This client's index `I` of `N`, seeding its random streams.
    #[arg(long, default_value_t = 0)]
    pub client_id: u32,

    /// Total client count `N`.
    #[arg(long, default_value_t = 1)]
    pub client_count: u32,

    /// Number of connections to create before stopping.
    #[arg(long, default_value_t = 1)]
    pub num_conns: u32,

    /// Number of calls to issue per connection before closing it.
    #[arg(long, default_value_t = 1)]
    pub num_calls: u32,

    /// Connection creation rate: `[d|u|e|s]R1[,R2]`, 0 = completion-driven.
    #[arg(long, default_value = "0")]
    pub conn_rate: String,

    /// Call issue rate: `[d|u|e|s]R1[,R2]`, 0 = completion-driven.
    #[arg(long, default_value = "0")]
    pub call_rate: String,

    /// Value size distribution: `[d|u|e|s]R1[,R2]`.
    #[arg(long, default_value = "d64")]
    pub sizes: String,

    /// Print the full per-millisecond latency histogram in the report.
    #[arg(long, default_value_t = false)]
    pub print_histogram: bool,
}

impl Cli {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        Config::build(ConfigSpec {
            server: self.server,
            port: self.port,
            verbosity: self.verbosity,
            output: self.output,
            timeout_secs: self.timeout,
            linger: self.linger,
            send_buffer: self.send_buffer,
            recv_buffer: self.recv_buffer,
            disable_nodelay: self.disable_nodelay,
            method: self.method,
            expiry: self.expiry,
            arithmetic_delta: self.arithmetic_delta,
            noreply: self.noreply,
            key_prefix: self.key_prefix,
            client_id: self.client_id,
            client_count: self.client_count,
            num_conns: self.num_conns,
            num_calls: self.num_calls,
            conn_rate: self.conn_rate,
            call_rate: self.call_rate,
            sizes: self.sizes,
            print_histogram: self.print_histogram,
        })
    }

    /// Derives a `tracing` filter directive from `--verbosity`.
    pub fn filter_directive(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_args() {
        let cli = Cli::parse_from(["loadbeat", "--server", "127.0.0.1", "--port", "11211"]);
        assert_eq!(cli.server, "127.0.0.1");
        assert_eq!(cli.port, 11211);
        assert_eq!(cli.num_conns, 1);
    }

    #[test]
    fn builds_config_from_defaults() {
        let cli = Cli::parse_from(["loadbeat"]);
        let cfg = cli.into_config().unwrap();
        assert_eq!(cfg.num_conns, 1);
    }

    #[test]
    fn rejects_bad_method_at_config_build() {
        let mut cli = Cli::parse_from(["loadbeat"]);
        cli.method = "bogus".into();
        assert!(cli.into_config().is_err());
    }
}
