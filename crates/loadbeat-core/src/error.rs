use thiserror::Error;

/// Errors that abort a whole run during configuration/startup. Everything
/// past this point is either a per-connection failure (handled on the event
/// bus, never propagated as a `Result`) or a protocol error (see
/// [`ProtocolError`]).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid distribution value '{0}'")]
    InvalidDistribution(String),

    #[error("invalid uniform distribution '{0}': expected 'min,max'")]
    InvalidUniformRange(String),

    #[error("key prefix '{0}' exceeds the 16 byte limit")]
    PrefixTooLong(String),

    #[error("value size {0} exceeds the 1 MiB limit")]
    ValueTooLarge(usize),

    #[error("unrecognised method '{0}'")]
    UnknownMethod(String),

    #[error("client index {id} out of range for client count {n}")]
    ClientIndexOutOfRange { id: u32, n: u32 },

    #[error("failed to resolve address: {0}")]
    AddressResolution(#[source] std::io::Error),
}

/// A malformed byte stream from the server: anything that isn't one of the
/// known response-line tags, or a `\n` not preceded by `\r`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("response line is not terminated by CRLF")]
    BareNewline,
    #[error("unrecognised response tag")]
    UnknownTag,
    #[error("value response framing was malformed")]
    MalformedValueHeader,
    #[error("response bytes spilled over with no queued call to receive them")]
    UnexpectedSpillover,
}

/// Fatal runtime errors: conditions the reference implementation treats as
/// unrecoverable process-level failures (`log_panic` in the corpus this is
/// grounded on).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to create poller: {0}")]
    PollerInit(#[source] std::io::Error),

    #[error("failed to open log file '{path}': {source}")]
    LogFileOpen { path: String, source: std::io::Error },

    #[error("more than {max} subscribers registered for event {event:?}")]
    TooManySubscribers { event: crate::event::EventType, max: usize },

    #[error("poller returned no ready sockets with no timeout bound")]
    NoForwardProgress,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
