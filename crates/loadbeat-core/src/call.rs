//! Call: one request/response pair on a connection.

use loadbeat_timing::Instant;

use crate::codec::RspTag;
use crate::conn::Connection;
use crate::pool::Handle;

/// Identifies a call within its owning connection's own call pool. Calls
/// are owned subobjects of their connection (never a process-wide arena),
/// so a `CallRef` is meaningless without the connection half.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallRef {
    pub conn: Handle<Connection>,
    pub call: Handle<Call>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Fresh,
    OnSendQueue,
    OnRecvQueue,
}

pub struct Request {
    /// The fully built request, concatenated in slot order (METHOD, KEY,
    /// FLAG, EXPIRY, VLEN, CAS, NOREPLY, CRLF, VALUE, CRLF2). `sent` is the
    /// number of leading bytes already written to the socket.
    pub buf: Vec<u8>,
    pub sent: usize,
    pub noreply: bool,
    pub issue_start: Instant,
    pub send_start: Option<Instant>,
    pub send_stop: Option<Instant>,
}

impl Request {
    pub fn to_send(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.sent..]
    }

    pub fn is_fully_sent(&self) -> bool {
        self.sent >= self.buf.len()
    }
}

pub struct Response {
    pub recv_start: Option<Instant>,
    pub tag: Option<RspTag>,
    /// Remaining bytes still to consume for a `VALUE` body (including its
    /// trailing `\r\n` and the final `END\r\n`); zero once the response is
    /// fully consumed.
    pub value_remaining: usize,
    pub rcvd: usize,
}

impl Default for Response {
    fn default() -> Self {
        Self { recv_start: None, tag: None, value_remaining: 0, rcvd: 0 }
    }
}

pub struct Call {
    pub id: u64,
    pub state: CallState,
    pub req: Request,
    pub rsp: Response,
}

impl Call {
    pub fn new(id: u64, buf: Vec<u8>, noreply: bool) -> Self {
        Self {
            id,
            state: CallState::Fresh,
            req: Request { buf, sent: 0, noreply, issue_start: Instant::now(), send_start: None, send_stop: None },
            rsp: Response::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tracks_how_much_has_been_sent() {
        let mut req = Request {
            buf: b"set key 0 0 3\r\nfoo\r\n".to_vec(),
            sent: 0,
            noreply: false,
            issue_start: Instant::now(),
            send_start: None,
            send_stop: None,
        };
        assert!(!req.is_fully_sent());
        assert_eq!(req.remaining().len(), req.to_send());

        req.sent = req.buf.len();
        assert!(req.is_fully_sent());
        assert!(req.remaining().is_empty());
    }

    #[test]
    fn fresh_call_has_no_response_yet() {
        let call = Call::new(7, b"get key\r\n".to_vec(), false);
        assert_eq!(call.state, CallState::Fresh);
        assert_eq!(call.rsp.rcvd, 0);
        assert!(call.rsp.tag.is_none());
    }
}
