use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by `Connection` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    /// The requested or negotiated STOMP version is not supported
    #[error("unsupported protocol version: '{0}'")]
    UnsupportedVersion(String),
    /// Operation not valid in the connection's current lifecycle state
    #[error("invalid connection state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },
    /// The connection has been shut down or was never started
    #[error("not connected")]
    NotConnected,
    /// An internal queue was closed by its receiving side
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
    /// A subscription with this id is already registered
    #[error("subscription '{0}' already exists")]
    SubscriptionExists(String),
    /// No subscription with this id is registered
    #[error("subscription '{0}' not found")]
    SubscriptionNotFound(String),
}

/// Read-side failures reported by the reader collaborator.
///
/// `ReadError` is `Clone` so that a single failure can be fanned out to the
/// general queue and every subscription queue. I/O errors are shared behind
/// an `Arc` because `io::Error` itself is not cloneable.
#[derive(Error, Debug, Clone)]
pub enum ReadError {
    /// Transport-level failure
    #[error("read io error: {0}")]
    Io(Arc<io::Error>),
    /// Malformed or unexpected input
    #[error("read protocol error: {0}")]
    Protocol(String),
    /// The transport reached end-of-stream
    #[error("end of stream")]
    EndOfStream,
    /// No inbound traffic within the negotiated receive window
    #[error("heartbeat timeout: nothing received for {0} ms")]
    HeartbeatTimeout(u64),
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        ReadError::Io(Arc::new(e))
    }
}

impl PartialEq for ReadError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ReadError::Io(a), ReadError::Io(b)) => Arc::ptr_eq(a, b),
            (ReadError::Protocol(a), ReadError::Protocol(b)) => a == b,
            (ReadError::EndOfStream, ReadError::EndOfStream) => true,
            (ReadError::HeartbeatTimeout(a), ReadError::HeartbeatTimeout(b)) => a == b,
            _ => false,
        }
    }
}
