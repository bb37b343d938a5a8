//! Public session types

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use ringline_srtp_core::{SrtpInfo, SrtpSetting};

use crate::sdp::MediaDirection;

/// Unique identifier of one call session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("sess-{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the call this session is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Signaling state of the call, mirroring the invite session's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CallState {
    Null,
    Calling,
    Incoming,
    Early,
    Connecting,
    Confirmed,
    Disconnecting,
    Disconnected,
}

impl CallState {
    /// Whether the call is on its way down (or gone)
    pub fn is_terminating(self) -> bool {
        self >= CallState::Disconnecting
    }
}

/// Media-plane status of the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaStatus {
    /// No media established (yet)
    None,
    Active,
    LocalHold,
    RemoteHold,
    /// Media negotiation failed; the call may still be up
    Error,
}

/// Application's decision when the call is redirected (3xx)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectAction {
    /// Follow this target
    Accept,
    /// Skip this target, try the next one
    Reject,
    /// Stop following redirects and end the call
    Stop,
}

/// Read-only call snapshot handed to applications
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub id: SessionId,
    pub role: CallRole,
    pub state: CallState,
    pub media_status: MediaStatus,
    pub direction: MediaDirection,
    /// First response observed
    pub response_time: Option<Instant>,
    /// Call confirmed
    pub connect_time: Option<Instant>,
    /// Call ended
    pub disconnect_time: Option<Instant>,
    /// Last signaling status code observed
    pub last_status: u16,
    pub last_reason: String,
    /// Secure-media snapshot of the active audio line, if any
    pub srtp: Option<SrtpInfo>,
}

/// Callbacks toward the application. Only state and media notifications
/// are mandatory; side-channel callbacks default to no-ops.
pub trait SessionCallbacks: Send + Sync {
    fn on_call_state(&self, info: &CallInfo);

    fn on_media_state(&self, info: &CallInfo);

    /// Transfer progress (REFER NOTIFY status). Return false to stop
    /// receiving further notifications.
    fn on_transfer_status(&self, _status: u16, _is_final: bool) -> bool {
        true
    }

    /// Redirect decision for a 3xx target
    fn on_redirect(&self, _target: &str) -> RedirectAction {
        RedirectAction::Accept
    }

    /// Delivery status of an instant message we sent
    fn on_im_status(&self, _body: &str, _delivered: bool) {}

    /// Instant message received inside the dialog
    fn on_incoming_message(&self, _body: &str) {}

    /// Peer's typing indication
    fn on_typing(&self, _is_typing: bool) {}
}

/// Per-session configuration, passed in by the owner
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Secure media setting applied to each created transport
    pub srtp: SrtpSetting,
}
