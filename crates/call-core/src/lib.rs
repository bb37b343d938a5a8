//! Call session control plane for ringline
//!
//! This crate owns a telephone call's lifecycle (offer, answer, hold,
//! re-negotiation, transfer, teardown) and coordinates the secure media
//! transports from `ringline-srtp-core` in lock-step with SDP offer/answer
//! exchanges:
//!
//! - [`session`]: the [`CallSession`] state machine and the codec-lock
//!   controller that narrows a multi-codec answer down to one
//! - [`media`]: secure-transport mediation for offers and answers
//! - [`sdp`]: the owned SDP negotiation model (wire syntax stays in the
//!   signaling stack)
//! - [`dialog`]: the borrowed invite-dialog contracts
//! - [`manager`]: the process-wide session registry and event routing
//!
//! The SIP transaction layer, SDP parser, codecs, and sound devices are
//! external collaborators consumed through the narrow traits in [`dialog`]
//! and `ringline_srtp_core::MediaTransport`.

pub mod api;
pub mod dialog;
pub mod errors;
pub mod manager;
pub mod media;
pub mod sdp;
pub mod session;

pub use api::types::{
    CallInfo, CallRole, CallState, MediaStatus, RedirectAction, SessionCallbacks,
    SessionConfig, SessionId,
};
pub use errors::{Result, SessionError};
pub use manager::CallManager;
pub use session::{CallSession, CODEC_LOCK_MAX_RETRY, CODEC_LOCK_RETRY_INTERVAL};
