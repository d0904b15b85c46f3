//! End-to-end scenarios driving the full run loop against a real loopback
//! TCP listener, matching the corpus's preference for a real socket over a
//! mocked transport in its own integration tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread;

use loadbeat_core::config::{Config, ConfigSpec};
use loadbeat_core::runtime::{self, Runtime};

fn base_spec(port: u16) -> ConfigSpec {
    ConfigSpec {
        server: "127.0.0.1".into(),
        port,
        verbosity: 0,
        output: None,
        timeout_secs: 2.0,
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
        sizes: "d8".into(),
        print_histogram: false,
    }
}

/// A single connection issuing a single `set`, against a server that
/// replies `STORED\r\n` to anything it reads a full line of.
#[test]
fn deterministic_single_call_completes_and_stops() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let mut body = vec![0u8; 8 + 2];
        reader.read_exact(&mut body).unwrap();
        let mut stream = stream;
        stream.write_all(b"STORED\r\n").unwrap();
    });

    let config = Config::build(base_spec(port)).unwrap();
    let mut rt = Runtime::new(config).unwrap();
    runtime::run(&mut rt).unwrap();

    server.join().unwrap();

    assert_eq!(rt.stats.nconn_created, 1);
    assert_eq!(rt.stats.nconn_destroyed, 1);
    assert_eq!(rt.stats.nreq, 1);
    assert_eq!(rt.stats.nrsp, 1);
    assert_eq!(rt.stats.rsp_types.stored, 1);
    assert_eq!(rt.stats.socket_errors.refused, 0);
}

/// `noreply` storage commands finish as soon as the bytes are on the wire;
/// the tool never waits for (and the server never sends) a reply.
#[test]
fn noreply_call_completes_without_a_response() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("noreply"));
        let mut body = vec![0u8; 8 + 2];
        reader.read_exact(&mut body).unwrap();
        // Deliberately sends nothing back.
    });

    let mut spec = base_spec(port);
    spec.noreply = true;
    let config = Config::build(spec).unwrap();
    let mut rt = Runtime::new(config).unwrap();
    runtime::run(&mut rt).unwrap();

    server.join().unwrap();

    assert_eq!(rt.stats.nreq, 1);
    assert_eq!(rt.stats.nrsp, 0);
    assert_eq!(rt.stats.nconn_destroyed, 1);
}

/// A `get` whose response is split across two TCP fragments still frames
/// correctly: the codec's recv buffer must survive a header arriving in
/// one `read` and the body plus terminator in a second.
#[test]
fn value_response_framed_across_two_fragments() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.starts_with("get "));

        stream.write_all(b"VALUE loadbeat:00000000 0 4\r\n").unwrap();
        thread::sleep(std::time::Duration::from_millis(20));
        stream.write_all(b"abcd\r\nEND\r\n").unwrap();
    });

    let mut spec = base_spec(port);
    spec.method = "get".into();
    let config = Config::build(spec).unwrap();
    let mut rt = Runtime::new(config).unwrap();
    runtime::run(&mut rt).unwrap();

    server.join().unwrap();

    assert_eq!(rt.stats.nrsp, 1);
    assert_eq!(rt.stats.rsp_types.value, 1);
    assert_eq!(rt.stats.rsp_bytes.mean() as usize, "VALUE loadbeat:00000000 0 4\r\n".len() + 4 + 2 + 5);
}

/// No server ever accepts the connection; the response/connect watchdog
/// must still trip and the run must still terminate rather than hang.
#[test]
fn connect_failure_is_recorded_and_the_run_still_terminates() {
    // Bind then immediately drop the listener so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut spec = base_spec(port);
    spec.timeout_secs = 0.2;
    let config = Config::build(spec).unwrap();
    let mut rt = Runtime::new(config).unwrap();
    runtime::run(&mut rt).unwrap();

    assert_eq!(rt.stats.nconn_created, 1);
    assert_eq!(rt.stats.nconn_destroyed, 1);
    assert_eq!(rt.stats.nreq, 0);
}

/// A stream of several calls on one connection all complete in order.
#[test]
fn multiple_calls_on_one_connection_complete_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        for _ in 0..3 {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut body = vec![0u8; 8 + 2];
            reader.read_exact(&mut body).unwrap();
            writer.write_all(b"STORED\r\n").unwrap();
        }
    });

    let mut spec = base_spec(port);
    spec.num_calls = 3;
    let config = Config::build(spec).unwrap();
    let mut rt = Runtime::new(config).unwrap();
    runtime::run(&mut rt).unwrap();

    server.join().unwrap();

    assert_eq!(rt.stats.nreq, 3);
    assert_eq!(rt.stats.nrsp, 3);
    assert_eq!(rt.stats.rsp_types.stored, 3);
}
