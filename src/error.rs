//! Error taxonomy for the protocol core.
//!
//! Transport and handshake failures tear the session down; everything else
//! is scoped to a single message, request or collection and leaves the
//! session running.

use thiserror::Error;

/// All errors surfaced by the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or WebSocket I/O failure. Fatal for the session.
    #[error("transport: {0}")]
    Transport(String),

    /// Noise handshake failure (cipher, DH or protobuf). Fatal.
    #[error("handshake: {0}")]
    Handshake(String),

    /// Per-message decryption failure. The message is dropped, the
    /// session continues.
    #[error("decryption: {0}")]
    Decryption(String),

    /// HMAC mismatch during app-state sync. The collection is reset and
    /// retried before this propagates.
    #[error("mac mismatch in {collection}")]
    MacMismatch { collection: String },

    /// Malformed node or missing required attribute.
    #[error("protocol: {0}")]
    Protocol(String),

    /// An iq went unanswered past its deadline. The waiter fails, the
    /// session stays open.
    #[error("request {id} timed out")]
    RequestTimeout { id: String },

    /// The session closed while a request was pending.
    #[error("session closed")]
    SessionClosed,

    /// Key/session store failure.
    #[error("store: {0}")]
    Store(String),
}

impl Error {
    /// True when this error must terminate the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Handshake(_))
    }

    /// The coarse kind reported through the `on_error` callback.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) => ErrorKind::Transport,
            Error::Handshake(_) => ErrorKind::Handshake,
            Error::Decryption(_) => ErrorKind::Decryption,
            Error::MacMismatch { .. } => ErrorKind::MacMismatch,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            Error::SessionClosed => ErrorKind::SessionClosed,
            Error::Store(_) => ErrorKind::Store,
        }
    }
}

/// Classifying kind, used by the listener surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Handshake,
    Decryption,
    MacMismatch,
    Protocol,
    RequestTimeout,
    SessionClosed,
    Store,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
