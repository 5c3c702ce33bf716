//! Error types for the relay.

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or relaying a session.
///
/// Every fatal kind ends the session it occurred in and nothing else;
/// no variant is ever reported back to the remote peer.
#[derive(Error, Debug)]
pub enum Error {
    /// Address header bytes violate the wire format
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// AEAD tag mismatch
    #[error("authentication failed")]
    Authentication,

    /// A chunk declared a payload longer than the framing allows
    #[error("chunk too large: declared {len} bytes, max {max}")]
    ChunkTooLarge {
        /// Declared payload length
        len: usize,
        /// Largest allowed payload
        max: usize,
    },

    /// A chunk declared an impossible length
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// The nonce counter wrapped around for this key
    #[error("nonce space exhausted")]
    NonceExhausted,

    /// Cryptographic setup failed (bad key length, KDF failure)
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Unknown cipher method name
    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),

    /// Network I/O error other than clean close or cancellation
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Name resolution failed or produced no usable address
    #[error("cannot resolve {0}")]
    Resolve(String),

    /// No activity within the peer's TTL
    #[error("idle timeout")]
    IdleTimeout,

    /// Operation stopped because teardown is already underway
    #[error("operation canceled")]
    Canceled,

    /// SOCKS5 negotiation failure on the local side
    #[error("socks5 error: {0}")]
    Socks5(String),

    /// Plugin process failure
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new malformed header error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedHeader(msg.into())
    }

    /// Create a new cryptographic error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new SOCKS5 error
    pub fn socks5(msg: impl Into<String>) -> Self {
        Error::Socks5(msg.into())
    }

    /// Check if this is the by-product of a teardown already in progress.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Check if this error is an idle timer expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::IdleTimeout)
    }

    /// Check if the remote peer sent bytes that violate the protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::MalformedHeader(_)
                | Error::Authentication
                | Error::ChunkTooLarge { .. }
                | Error::InvalidChunk(_)
                | Error::Socks5(_)
        )
    }
}
