//! Error types for SRTP policy negotiation and packet protection.
//!
//! The variants fall into four classes with different propagation rules:
//! configuration errors are returned to the caller at construction or
//! negotiation time, negotiation-protocol errors each carry a distinct code
//! so the signaling layer can pick the right SIP rejection, runtime
//! per-packet errors are terminal for the offending packet only, and
//! resource errors are rejected before any cryptographic work is attempted.

use thiserror::Error;

/// Result type for SRTP operations
pub type Result<T> = std::result::Result<T, SrtpError>;

/// Errors produced by the SRTP layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SrtpError {
    // -- Configuration -------------------------------------------------

    /// Crypto suite name not present in the catalog
    #[error("unknown crypto suite: {name}")]
    UnknownSuite { name: String },

    /// Key length does not match the suite's declared cipher key length
    #[error("bad key length for {suite}: expected {expected} bytes, got {actual}")]
    KeyLength {
        suite: &'static str,
        expected: usize,
        actual: usize,
    },

    /// No usable crypto suite remains under the configured policy
    #[error("no usable crypto suite configured")]
    NoUsableSuite,

    // -- Negotiation protocol ------------------------------------------

    /// Remote offer repeated a crypto tag
    #[error("duplicate crypto tag {tag} in offer")]
    DuplicateTag { tag: u32 },

    /// Remote answer carried more than one crypto attribute
    #[error("ambiguous answer: {count} crypto attributes, expected 1")]
    AmbiguousAnswer { count: usize },

    /// Answer's suite name does not match the offer at the same tag
    #[error("crypto answer mismatch: offered {offered}, answered {answered}")]
    SuiteMismatch { offered: String, answered: String },

    /// Peer sent no usable crypto while the local policy is mandatory
    #[error("remote did not offer/answer the required crypto")]
    CryptoRequired,

    // -- Attribute parsing ---------------------------------------------

    /// Crypto attribute tag is not a plain decimal integer
    #[error("invalid crypto tag: {text}")]
    InvalidTag { text: String },

    /// Key method is not `inline`
    #[error("unsupported key method: {method}")]
    InvalidKeyMethod { method: String },

    /// Key field failed to base64-decode or exceeds the key buffer
    #[error("invalid inline key parameter")]
    InvalidKey,

    /// Attribute line does not have the `<tag> <suite> <key-params>` shape
    #[error("malformed crypto attribute")]
    MalformedAttribute,

    // -- Runtime (per-packet) ------------------------------------------

    /// Authentication tag verification failed
    #[error("packet authentication failed")]
    AuthenticationFailed,

    /// Packet index is older than the replay window
    #[error("packet replayed: index older than replay window")]
    ReplayTooOld,

    /// Packet index was already received
    #[error("packet replayed: duplicate index")]
    ReplayDuplicate,

    /// Packet index space for this key is used up
    #[error("key exhausted: packet index space consumed")]
    KeyExhausted,

    /// Packet too short to be a valid RTP/RTCP packet
    #[error("packet truncated or malformed")]
    BadPacket,

    // -- Resource ------------------------------------------------------

    /// Packet exceeds the fixed-capacity protection buffer
    #[error("packet of {len} bytes exceeds scratch capacity {capacity}")]
    TooLarge { len: usize, capacity: usize },

    /// Operation requires a started crypto session
    #[error("secure transport not started")]
    NotStarted,

    /// Operation requires an attached transport
    #[error("transport not attached")]
    NotAttached,

    /// Underlying transport failed
    #[error("media transport error: {message}")]
    Transport { message: String },
}

impl SrtpError {
    /// Whether this error is in the replay sub-class that may trigger the
    /// bounded autonomous session restart on the receive path.
    pub fn is_replay(&self) -> bool {
        matches!(self, SrtpError::ReplayTooOld | SrtpError::ReplayDuplicate)
    }

    /// Whether this error is a negotiation-protocol error (distinct SIP
    /// rejection responses map from these).
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            SrtpError::DuplicateTag { .. }
                | SrtpError::AmbiguousAnswer { .. }
                | SrtpError::SuiteMismatch { .. }
                | SrtpError::CryptoRequired
        )
    }
}
