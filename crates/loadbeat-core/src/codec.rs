//! Protocol codec: builds a memcached ASCII request as a single contiguous
//! buffer (conceptually the reference implementation's ten-slot gather
//! vector: METHOD, KEY, FLAG, EXPIRY, VLEN, CAS, NOREPLY, CRLF, VALUE,
//! CRLF2 — concatenated up front rather than issued as a `writev` of ten
//! discrete iovecs, since the partial-send bookkeeping only needs a byte
//! cursor into one buffer, not per-slot offsets) and parses the response
//! stream back out of it.

use crate::error::ProtocolError;

pub const MAX_PREFIX_LEN: usize = 16;
pub const MAX_VALUE_LEN: usize = 1024 * 1024;
pub const RECV_BUF_SIZE: usize = 8 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Gets,
    Delete,
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
    Incr,
    Decr,
}

impl Method {
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "get" => Method::Get,
            "gets" => Method::Gets,
            "delete" => Method::Delete,
            "set" => Method::Set,
            "add" => Method::Add,
            "replace" => Method::Replace,
            "append" => Method::Append,
            "prepend" => Method::Prepend,
            "cas" => Method::Cas,
            "incr" => Method::Incr,
            "decr" => Method::Decr,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Gets => "gets",
            Method::Delete => "delete",
            Method::Set => "set",
            Method::Add => "add",
            Method::Replace => "replace",
            Method::Append => "append",
            Method::Prepend => "prepend",
            Method::Cas => "cas",
            Method::Incr => "incr",
            Method::Decr => "decr",
        }
    }

    pub fn shape(self) -> Shape {
        match self {
            Method::Get | Method::Gets => Shape::Retrieval,
            Method::Delete => Shape::Delete,
            Method::Set | Method::Add | Method::Replace | Method::Append | Method::Prepend | Method::Cas => {
                Shape::Storage
            }
            Method::Incr | Method::Decr => Shape::Arithmetic,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Retrieval,
    Delete,
    Storage,
    Arithmetic,
}

/// Synthesises `<prefix><8-hex-lower>`, where the numeric suffix is the
/// current size-distribution id.
pub fn synthesize_key(prefix: &str, id: u32) -> String {
    debug_assert!(prefix.len() <= MAX_PREFIX_LEN);
    format!("{prefix}{id:08x}")
}

/// Parameters needed to build one request. `arithmetic_delta` is only
/// meaningful for `incr`/`decr` (it reuses the expiry slot's position in
/// the wire format); `value_len` is only meaningful for storage shapes.
pub struct RequestSpec<'a> {
    pub method: Method,
    pub key: &'a str,
    pub expiry: u32,
    pub arithmetic_delta: u64,
    pub noreply: bool,
    pub value_len: usize,
    pub value_source: &'a [u8],
}

/// Builds the request buffer for one call. `value_source` must contain at
/// least `value_len` bytes; callers hand in a slice of the process-wide 1
/// MiB zero-filled value buffer.
pub fn build_request(spec: &RequestSpec<'_>) -> Result<Vec<u8>, crate::error::ConfigError> {
    if spec.value_len > MAX_VALUE_LEN {
        return Err(crate::error::ConfigError::ValueTooLarge(spec.value_len));
    }

    let mut buf = Vec::with_capacity(64 + spec.value_len);
    buf.extend_from_slice(spec.method.as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(spec.key.as_bytes());

    match spec.method.shape() {
        Shape::Retrieval => {}
        Shape::Delete => {
            if spec.noreply {
                buf.extend_from_slice(b" noreply");
            }
        }
        Shape::Storage => {
            buf.extend_from_slice(b" 0 ");
            write_decimal(&mut buf, u64::from(spec.expiry));
            buf.push(b' ');
            write_decimal(&mut buf, spec.value_len as u64);
            if spec.method == Method::Cas {
                buf.extend_from_slice(b" 1");
            }
            if spec.noreply {
                buf.extend_from_slice(b" noreply");
            }
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(&spec.value_source[..spec.value_len]);
            buf.extend_from_slice(b"\r\n");
            return Ok(buf);
        }
        Shape::Arithmetic => {
            buf.push(b' ');
            write_decimal(&mut buf, spec.arithmetic_delta);
            if spec.noreply {
                buf.extend_from_slice(b" noreply");
            }
        }
    }
    buf.extend_from_slice(b"\r\n");
    Ok(buf)
}

fn write_decimal(buf: &mut Vec<u8>, mut value: u64) {
    if value == 0 {
        buf.push(b'0');
        return;
    }
    let start = buf.len();
    while value > 0 {
        buf.push(b'0' + (value % 10) as u8);
        value /= 10;
    }
    buf[start..].reverse();
}

/// One classified response line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RspTag {
    Stored,
    NotStored,
    Exists,
    NotFound,
    End,
    Value,
    Deleted,
    Error,
    ClientError,
    ServerError,
    /// A purely numeric reply, as returned by `incr`/`decr`. Classified by
    /// "first byte is an ASCII digit" rather than matching against an
    /// empty-string table entry, resolving the collision the source this
    /// is grounded on left as an open question.
    Num,
}

const TAGS: &[(&[u8], RspTag)] = &[
    (b"STORED", RspTag::Stored),
    (b"NOT_STORED", RspTag::NotStored),
    (b"EXISTS", RspTag::Exists),
    (b"NOT_FOUND", RspTag::NotFound),
    (b"END", RspTag::End),
    (b"VALUE", RspTag::Value),
    (b"DELETED", RspTag::Deleted),
    (b"CLIENT_ERROR", RspTag::ClientError),
    (b"SERVER_ERROR", RspTag::ServerError),
    (b"ERROR", RspTag::Error),
];

fn classify_tag(line: &[u8]) -> Option<RspTag> {
    if line.first().is_some_and(u8::is_ascii_digit) {
        return Some(RspTag::Num);
    }
    TAGS.iter()
        .filter(|(prefix, _)| line.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, tag)| *tag)
}

/// Result of one line-phase scan.
pub enum LineOutcome {
    NeedMore,
    Line { tag: RspTag, line_len: usize },
    Error(ProtocolError),
}

/// Scans `buf` from the start for a `\r\n`-terminated line and classifies
/// it. `line_len` is the number of bytes consumed including the `\r\n`.
pub fn scan_line(buf: &[u8]) -> LineOutcome {
    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        return LineOutcome::NeedMore;
    };
    if nl == 0 || buf[nl - 1] != b'\r' {
        return LineOutcome::Error(ProtocolError::BareNewline);
    }
    let line = &buf[..nl - 1];
    match classify_tag(line) {
        Some(tag) => LineOutcome::Line { tag, line_len: nl + 1 },
        None => LineOutcome::Error(ProtocolError::UnknownTag),
    }
}

/// Parses the `VALUE <key> <flags> <bytes>` header (the line, sans its
/// trailing `\r\n`, already stripped by the caller) and returns the total
/// number of bytes still to consume for the body: `<bytes>` plus the
/// value's own trailing `\r\n` plus the final `END\r\n`.
pub fn parse_value_header(line: &[u8]) -> Result<usize, ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::MalformedValueHeader)?;
    let mut tokens = text.split_ascii_whitespace();
    let _key = tokens.next().ok_or(ProtocolError::MalformedValueHeader)?;
    let _flags = tokens.next().ok_or(ProtocolError::MalformedValueHeader)?;
    let bytes_tok = tokens.next().ok_or(ProtocolError::MalformedValueHeader)?;
    let bytes: usize = bytes_tok.parse().map_err(|_| ProtocolError::MalformedValueHeader)?;
    Ok(bytes + 2 + "END\r\n".len())
}

/// The per-connection receive window: a fixed 8 KiB byte buffer with a
/// write cursor (`filled`) and a parse cursor (`parsed`). Compaction only
/// happens when the buffer is full, matching the reference implementation
/// exactly; this crate does not replicate its cursor-rewind-by-one
/// behaviour near `parsed == filled` (see `SPEC_FULL.md` §9/§4.7).
pub struct RecvBuffer {
    data: Box<[u8; RECV_BUF_SIZE]>,
    filled: usize,
    parsed: usize,
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self { data: Box::new([0u8; RECV_BUF_SIZE]), filled: 0, parsed: 0 }
    }

    pub fn unparsed(&self) -> &[u8] {
        &self.data[self.parsed..self.filled]
    }

    pub fn is_full(&self) -> bool {
        self.filled == RECV_BUF_SIZE
    }

    /// Compacts the unparsed tail to the front if the buffer is full,
    /// returning the writable tail slice to read into.
    pub fn writable_tail(&mut self) -> &mut [u8] {
        if self.is_full() {
            self.data.copy_within(self.parsed..self.filled, 0);
            self.filled -= self.parsed;
            self.parsed = 0;
        }
        &mut self.data[self.filled..]
    }

    pub fn advance_filled(&mut self, n: usize) {
        self.filled += n;
    }

    pub fn advance_parsed(&mut self, n: usize) {
        self.parsed += n;
        if self.parsed == self.filled {
            self.parsed = 0;
            self.filled = 0;
        }
    }
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_retrieval_request() {
        let req = build_request(&RequestSpec {
            method: Method::Get,
            key: "mcp:00000001",
            expiry: 0,
            arithmetic_delta: 0,
            noreply: false,
            value_len: 0,
            value_source: &[],
        })
        .unwrap();
        assert_eq!(req, b"get mcp:00000001\r\n");
    }

    #[test]
    fn builds_storage_request_with_zero_length_value() {
        let req = build_request(&RequestSpec {
            method: Method::Set,
            key: "k",
            expiry: 5,
            arithmetic_delta: 0,
            noreply: false,
            value_len: 0,
            value_source: &[],
        })
        .unwrap();
        assert_eq!(req, b"set k 0 5 0\r\n\r\n");
    }

    #[test]
    fn builds_storage_request_with_value_and_noreply() {
        let value = vec![b'0'; 4];
        let req = build_request(&RequestSpec {
            method: Method::Set,
            key: "k",
            expiry: 0,
            arithmetic_delta: 0,
            noreply: true,
            value_len: 4,
            value_source: &value,
        })
        .unwrap();
        assert_eq!(req, b"set k 0 0 4 noreply\r\n0000\r\n");
    }

    #[test]
    fn builds_cas_request() {
        let value = vec![b'0'; 2];
        let req = build_request(&RequestSpec {
            method: Method::Cas,
            key: "k",
            expiry: 0,
            arithmetic_delta: 0,
            noreply: false,
            value_len: 2,
            value_source: &value,
        })
        .unwrap();
        assert_eq!(req, b"cas k 0 0 2 1\r\n00\r\n");
    }

    #[test]
    fn builds_arithmetic_request() {
        let req = build_request(&RequestSpec {
            method: Method::Incr,
            key: "k",
            expiry: 0,
            arithmetic_delta: 7,
            noreply: false,
            value_len: 0,
            value_source: &[],
        })
        .unwrap();
        assert_eq!(req, b"incr k 7\r\n");
    }

    #[test]
    fn classifies_stored() {
        match scan_line(b"STORED\r\n") {
            LineOutcome::Line { tag, line_len } => {
                assert_eq!(tag, RspTag::Stored);
                assert_eq!(line_len, 8);
            }
            _ => panic!("expected a classified line"),
        }
    }

    #[test]
    fn classifies_numeric_reply() {
        match scan_line(b"42\r\n") {
            LineOutcome::Line { tag, .. } => assert_eq!(tag, RspTag::Num),
            _ => panic!("expected a classified line"),
        }
    }

    #[test]
    fn client_error_does_not_collide_with_error() {
        match scan_line(b"CLIENT_ERROR bad command line format\r\n") {
            LineOutcome::Line { tag, .. } => assert_eq!(tag, RspTag::ClientError),
            _ => panic!("expected a classified line"),
        }
    }

    #[test]
    fn bare_newline_is_an_error_not_need_more() {
        matches!(scan_line(b"STORED\n"), LineOutcome::Error(ProtocolError::BareNewline));
    }

    #[test]
    fn incomplete_line_needs_more() {
        matches!(scan_line(b"STOR"), LineOutcome::NeedMore);
    }

    #[test]
    fn value_header_computes_total_remaining() {
        let remaining = parse_value_header(b"k 0 5").unwrap();
        assert_eq!(remaining, 5 + 2 + 5);
    }

    #[test]
    fn recv_buffer_compacts_only_when_full() {
        let mut rb = RecvBuffer::new();
        rb.advance_filled(10);
        rb.advance_parsed(5);
        let tail_len_before = rb.writable_tail().len();
        assert_eq!(tail_len_before, RECV_BUF_SIZE - 10);
    }
}
