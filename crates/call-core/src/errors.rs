//! Session-level error types
//!
//! Negotiation and configuration failures surface synchronously through
//! these variants; the session maps them onto the correct SIP-level
//! rejection or deactivates only the affected media line. A
//! security-policy failure is distinct from a generic signaling failure so
//! applications can tell them apart.

use thiserror::Error;

use ringline_srtp_core::SrtpError;

use crate::dialog::DialogError;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors produced by the call-session layer
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    #[error("invalid state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Secure-media negotiation failed; carries the distinct SRTP code
    #[error("security negotiation failed: {source}")]
    SecurityNegotiation {
        #[from]
        source: SrtpError,
    },

    /// A media line was administratively deactivated rather than the whole
    /// call being torn down
    #[error("media line {index} deactivated: {reason}")]
    MediaDeactivated { index: usize, reason: String },

    #[error("dialog error: {source}")]
    Dialog {
        #[from]
        source: DialogError,
    },

    /// A later negotiation completed while this update was being prepared
    #[error("stale SDP: acted on version {acted}, active version is {current}")]
    StaleSdp { acted: u64, current: u64 },

    #[error("no active audio line in the session")]
    NoAudioLine,

    /// Peer negotiated no telephone-event payload
    #[error("DTMF not negotiated with the peer")]
    DtmfUnavailable,
}

impl SessionError {
    /// Whether this is a secure-media policy failure (as opposed to a
    /// generic signaling failure).
    pub fn is_security_failure(&self) -> bool {
        matches!(self, SessionError::SecurityNegotiation { .. })
    }
}
