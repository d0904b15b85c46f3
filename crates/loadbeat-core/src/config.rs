//! The immutable, validated result of CLI parsing. Constructed exactly
//! once near the top of `main` and passed by shared reference to every
//! subsystem; never mutated afterward.

use std::net::SocketAddr;

use loadbeat_timing::Duration;

use crate::codec::{Method, MAX_PREFIX_LEN, MAX_VALUE_LEN};
use crate::distribution::DistOpt;
use crate::error::ConfigError;

pub struct Config {
    pub server: String,
    pub port: u16,
    pub addr: SocketAddr,
    pub verbosity: u8,
    pub output: Option<String>,
    pub connect_timeout: Duration,
    pub linger: Option<i32>,
    pub send_buffer: Option<usize>,
    pub recv_buffer: Option<usize>,
    pub disable_nodelay: bool,
    pub method: Method,
    pub expiry: u32,
    pub arithmetic_delta: u64,
    pub noreply: bool,
    pub key_prefix: String,
    pub client_id: u32,
    pub client_count: u32,
    pub num_conns: u32,
    pub num_calls: u32,
    pub conn_dist: DistOpt,
    pub call_dist: DistOpt,
    pub size_dist: DistOpt,
    pub print_histogram: bool,
}

/// Pre-validated, unresolved fields a CLI layer fills in before handing
/// off to [`Config::build`], which performs the one remaining fallible
/// step: address resolution.
pub struct ConfigSpec {
    pub server: String,
    pub port: u16,
    pub verbosity: u8,
    pub output: Option<String>,
    pub timeout_secs: f64,
    pub linger: Option<i32>,
    pub send_buffer: Option<usize>,
    pub recv_buffer: Option<usize>,
    pub disable_nodelay: bool,
    pub method: String,
    pub expiry: u32,
    pub arithmetic_delta: u64,
    pub noreply: bool,
    pub key_prefix: String,
    pub client_id: u32,
    pub client_count: u32,
    pub num_conns: u32,
    pub num_calls: u32,
    pub conn_rate: String,
    pub call_rate: String,
    pub sizes: String,
    pub print_histogram: bool,
}

impl Config {
    pub fn build(spec: ConfigSpec) -> Result<Self, ConfigError> {
        if spec.key_prefix.len() > MAX_PREFIX_LEN {
            return Err(ConfigError::PrefixTooLong(spec.key_prefix));
        }
        if spec.client_id >= spec.client_count {
            return Err(ConfigError::ClientIndexOutOfRange { id: spec.client_id, n: spec.client_count });
        }
        let method = Method::parse(&spec.method).ok_or_else(|| ConfigError::UnknownMethod(spec.method.clone()))?;

        let conn_dist = DistOpt::parse(&spec.conn_rate)?;
        let call_dist = DistOpt::parse(&spec.call_rate)?;
        let size_dist = DistOpt::parse(&spec.sizes)?;
        if size_dist.max > MAX_VALUE_LEN as f64 {
            return Err(ConfigError::ValueTooLarge(size_dist.max as usize));
        }

        let addr = loadbeat_net::resolve_addr(&spec.server, spec.port).map_err(ConfigError::AddressResolution)?;

        Ok(Self {
            server: spec.server,
            port: spec.port,
            addr,
            verbosity: spec.verbosity,
            output: spec.output,
            connect_timeout: Duration::from_secs_f64(spec.timeout_secs),
            linger: spec.linger,
            send_buffer: spec.send_buffer,
            recv_buffer: spec.recv_buffer,
            disable_nodelay: spec.disable_nodelay,
            method,
            expiry: spec.expiry,
            arithmetic_delta: spec.arithmetic_delta,
            noreply: spec.noreply,
            key_prefix: spec.key_prefix,
            client_id: spec.client_id,
            client_count: spec.client_count,
            num_conns: spec.num_conns,
            num_calls: spec.num_calls,
            conn_dist,
            call_dist,
            size_dist,
            print_histogram: spec.print_histogram,
        })
    }
}

/// A minimal, valid spec other modules' tests can build a real [`Config`]
/// (and from it a real [`crate::runtime::Runtime`]) from, without each
/// test module re-deriving the full set of required fields.
#[cfg(test)]
pub(crate) fn test_spec() -> ConfigSpec {
    ConfigSpec {
        server: "127.0.0.1".into(),
        port: 0,
        verbosity: 0,
        output: None,
        timeout_secs: 1.0,
        linger: None,
        send_buffer: None,
        recv_buffer: None,
        disable_nodelay: false,
        method: "set".into(),
        expiry: 0,
        arithmetic_delta: 1,
        noreply: false,
        key_prefix: "loadbeat:".into(),
        client_id: 0,
        client_count: 1,
        num_conns: 1,
        num_calls: 1,
        conn_rate: "0".into(),
        call_rate: "0".into(),
        sizes: "d64".into(),
        print_histogram: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> ConfigSpec {
        ConfigSpec {
            server: "127.0.0.1".into(),
            port: 11211,
            verbosity: 0,
            output: None,
            timeout_secs: 1.0,
            linger: None,
            send_buffer: None,
            recv_buffer: None,
            disable_nodelay: false,
            method: "set".into(),
            expiry: 0,
            arithmetic_delta: 1,
            noreply: false,
            key_prefix: "loadbeat:".into(),
            client_id: 0,
            client_count: 1,
            num_conns: 1,
            num_calls: 1,
            conn_rate: "0".into(),
            call_rate: "0".into(),
            sizes: "d64".into(),
            print_histogram: false,
        }
    }

    #[test]
    fn rejects_oversized_prefix() {
        let mut spec = base_spec();
        spec.key_prefix = "x".repeat(MAX_PREFIX_LEN + 1);
        assert!(matches!(Config::build(spec), Err(ConfigError::PrefixTooLong(_))));
    }

    #[test]
    fn rejects_client_index_out_of_range() {
        let mut spec = base_spec();
        spec.client_id = 5;
        spec.client_count = 5;
        assert!(matches!(Config::build(spec), Err(ConfigError::ClientIndexOutOfRange { .. })));
    }

    #[test]
    fn rejects_unknown_method() {
        let mut spec = base_spec();
        spec.method = "frobnicate".into();
        assert!(matches!(Config::build(spec), Err(ConfigError::UnknownMethod(_))));
    }

    #[test]
    fn builds_a_valid_config() {
        let cfg = Config::build(base_spec()).unwrap();
        assert_eq!(cfg.num_conns, 1);
        assert_eq!(cfg.method, Method::Set);
    }
}
