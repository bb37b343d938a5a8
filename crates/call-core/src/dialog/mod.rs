//! Borrowed signaling-layer contracts
//!
//! The SIP dialog, its transactions, and retransmission timers live in the
//! signaling stack. The session borrows one dialog through [`InviteDialog`]
//! and is driven back through the invite-session callbacks on
//! [`crate::session::CallSession`]: `on_state_changed`, `on_media_update`,
//! `on_rx_offer`, `on_create_offer`, plus the transaction-derived events
//! (`on_transfer_notify`, `on_redirected`, `on_message_received`,
//! `on_typing_received`).

use async_trait::async_trait;
use thiserror::Error;

use crate::sdp::SessionDescription;

/// Errors surfaced by the borrowed dialog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialogError {
    /// Another SDP negotiation is already in flight on this dialog
    #[error("another negotiation is in flight")]
    NegotiationInFlight,

    /// The dialog has reached its terminal state
    #[error("dialog is terminated")]
    Terminated,

    /// The remote lacks a required capability
    #[error("remote does not support {capability}")]
    Unsupported { capability: String },

    #[error("signaling transport failure: {message}")]
    Transport { message: String },
}

/// How a re-negotiation is carried inside the dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenegotiateMethod {
    /// Lighter-weight UPDATE request (RFC 3311)
    Update,
    /// Full re-INVITE
    Reinvite,
}

/// Capability the session queries before choosing [`RenegotiateMethod`]
pub const CAP_UPDATE: &str = "UPDATE";

/// The one dialog this session borrows from the signaling layer.
///
/// Implementations wrap the real invite session; the test suite wires in
/// an in-memory double.
#[async_trait]
pub trait InviteDialog: Send + Sync {
    /// Stable dialog identifier
    fn id(&self) -> &str;

    /// Whether the remote advertised support for a capability (e.g. the
    /// UPDATE method in its Allow header)
    fn remote_has_capability(&self, capability: &str) -> bool;

    /// Send a new SDP offer inside the dialog
    async fn send_offer(
        &self,
        method: RenegotiateMethod,
        offer: SessionDescription,
    ) -> Result<(), DialogError>;

    /// Send a provisional or final response carrying our answer
    async fn send_answer(
        &self,
        status: u16,
        answer: Option<SessionDescription>,
    ) -> Result<(), DialogError>;

    /// Send a non-2xx final response (reject, redirect follow-up)
    async fn respond(&self, status: u16, reason: &str) -> Result<(), DialogError>;

    /// Terminate the dialog (BYE or CANCEL as appropriate)
    async fn terminate(&self, status: u16) -> Result<(), DialogError>;

    /// Send a REFER for blind transfer
    async fn send_refer(&self, target: &str) -> Result<(), DialogError>;

    /// Report transfer progress back to a transferor (NOTIFY)
    async fn notify_transfer_progress(
        &self,
        status: u16,
        is_final: bool,
    ) -> Result<(), DialogError>;

    /// Instant message inside the dialog (MESSAGE)
    async fn send_message(&self, mime: &str, body: String) -> Result<(), DialogError>;

    /// Typing indication inside the dialog
    async fn send_typing(&self, is_typing: bool) -> Result<(), DialogError>;
}
