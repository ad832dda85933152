//! Error taxonomy for the broker.
//!
//! The wire protocol, the figure model, and the broker event loop all need to
//! distinguish a handful of *kinds* of failure rather than exhaustively typed
//! error enums: a malformed frame drops the connection, a protocol violation
//! becomes a `RESP_ERR` reply, a resource failure rolls back partial state.
//! [`ErrorKind`] carries that distinction over an [`anyhow::Error`] payload so
//! call sites keep using `?`/`context` freely while the broker loop can still
//! ask "what do I do with this."

use std::fmt;

/// The four failure categories the broker needs to handle differently.
///
/// See the protocol error-handling design for the full decision table; this
/// enum only needs to carry enough information for the broker loop to pick
/// the right response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The decoder could not make sense of bytes on the wire (bad magic,
    /// truncated header, unterminated TLV). Unrecoverable for the
    /// connection: the socket is closed and the peer (if any) is dropped
    /// from the session graph.
    Framing,
    /// A `send`/`recv` syscall failed on an otherwise well-formed exchange.
    /// Handled locally by the caller; never surfaced to a peer.
    Transport,
    /// The request was well-formed but invalid given current state (unknown
    /// figure id, bad axes index, duplicate series name, ...). Answered with
    /// `RESP_ERR` carrying `code`.
    Protocol {
        /// HTTP-style status code carried in the `RESP_ERR` reply
        /// (400 malformed request, 404 unknown id, 409 conflict).
        code: u16,
    },
    /// An internal failure unrelated to the request's validity (allocation
    /// failure, spawn failure, poisoned mutex). Answered with `RESP_ERR 500`;
    /// any partially-applied state is rolled back.
    Resource,
    /// Orderly teardown: peer requested close, or the broker is shutting
    /// down. Not an error condition by itself, but routed through the same
    /// plumbing so cleanup code has one path to follow.
    Lifecycle,
}

impl ErrorKind {
    /// The numeric code to put in a `RESP_ERR` reply, if this kind produces one.
    #[must_use]
    pub fn response_code(self) -> Option<u16> {
        match self {
            ErrorKind::Protocol { code } => Some(code),
            ErrorKind::Resource => Some(500),
            ErrorKind::Framing | ErrorKind::Transport | ErrorKind::Lifecycle => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Framing => write!(f, "framing error"),
            ErrorKind::Transport => write!(f, "transport error"),
            ErrorKind::Protocol { code } => write!(f, "protocol error ({code})"),
            ErrorKind::Resource => write!(f, "resource error"),
            ErrorKind::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

/// Extension trait to attach an [`ErrorKind`] to an [`anyhow::Error`] chain.
///
/// ```ignore
/// find_figure(id).ok_or_else(|| anyhow!("unknown figure {id}"))
///     .kind(ErrorKind::Protocol { code: 404 })?;
/// ```
pub trait ResultExt<T> {
    /// Attach `kind` to this result's error, if any.
    fn kind(self, kind: ErrorKind) -> Result<T, BrokerError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn kind(self, kind: ErrorKind) -> Result<T, BrokerError> {
        self.map_err(|e| BrokerError { kind, source: e.into() })
    }
}

/// An [`anyhow::Error`] tagged with an [`ErrorKind`].
#[derive(Debug)]
pub struct BrokerError {
    /// Category driving how the broker loop reacts to this error.
    pub kind: ErrorKind,
    /// The underlying error chain.
    pub source: anyhow::Error,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.source)
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

impl BrokerError {
    /// Construct directly from a kind and any error-convertible value.
    pub fn new(kind: ErrorKind, source: impl Into<anyhow::Error>) -> Self {
        Self { kind, source: source.into() }
    }

    /// Shorthand for a [`ErrorKind::Protocol`] error with a message.
    pub fn protocol(code: u16, message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Protocol { code }, source: anyhow::anyhow!(message.into()) }
    }
}

/// Crate-wide result alias for fallible operations that need [`anyhow`]'s
/// `?`/`context` ergonomics but don't need to carry an [`ErrorKind`].
pub type Result<T> = anyhow::Result<T>;
