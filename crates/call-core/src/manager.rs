//! Call manager: session registry and signaling-event routing
//!
//! Sessions are stored in a concurrent map keyed by session id with a
//! dialog-id index. Lookups follow the lookup-then-detach pattern: the map
//! shard is held only long enough to clone the session handle, then
//! released before any per-call work runs, so slow call logic never blocks
//! the table.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use ringline_srtp_core::{MediaTransport, SecureMediaTransport};

use crate::api::types::{
    CallRole, CallState, RedirectAction, SessionCallbacks, SessionConfig, SessionId,
};
use crate::dialog::InviteDialog;
use crate::errors::{Result, SessionError};
use crate::sdp::SessionDescription;
use crate::session::CallSession;

/// Owns every live call session in the process.
pub struct CallManager {
    config: SessionConfig,
    sessions: DashMap<SessionId, Arc<CallSession>>,
    by_dialog: DashMap<String, SessionId>,
}

impl CallManager {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: DashMap::new(),
            by_dialog: DashMap::new(),
        })
    }

    /// Create the session for an outgoing call. `media` are the underlying
    /// per-line transports; each is wrapped in a [`SecureMediaTransport`]
    /// owned by the session. The signaling layer obtains the INVITE body
    /// through `on_create_offer`.
    pub fn make_call(
        &self,
        dialog: Arc<dyn InviteDialog>,
        callbacks: Arc<dyn SessionCallbacks>,
        prototype: SessionDescription,
        media: Vec<Arc<dyn MediaTransport>>,
    ) -> Arc<CallSession> {
        self.create_session(CallRole::Caller, dialog, callbacks, prototype, media)
    }

    /// Create the session for an inbound INVITE.
    pub fn incoming_call(
        &self,
        dialog: Arc<dyn InviteDialog>,
        callbacks: Arc<dyn SessionCallbacks>,
        prototype: SessionDescription,
        media: Vec<Arc<dyn MediaTransport>>,
    ) -> Arc<CallSession> {
        self.create_session(CallRole::Callee, dialog, callbacks, prototype, media)
    }

    fn create_session(
        &self,
        role: CallRole,
        dialog: Arc<dyn InviteDialog>,
        callbacks: Arc<dyn SessionCallbacks>,
        prototype: SessionDescription,
        media: Vec<Arc<dyn MediaTransport>>,
    ) -> Arc<CallSession> {
        let transports: Vec<Arc<SecureMediaTransport>> = media
            .into_iter()
            .map(|inner| {
                let t = SecureMediaTransport::new(inner, self.config.srtp.clone());
                t.media_create(ringline_srtp_core::SrtpUse::Disabled);
                t
            })
            .collect();
        let dialog_id = dialog.id().to_string();
        let session = CallSession::new(role, dialog, callbacks, self.config.clone(), prototype, transports);
        self.by_dialog.insert(dialog_id, session.id().clone());
        self.sessions.insert(session.id().clone(), session.clone());
        info!(session = %session.id(), total = self.sessions.len(), "session registered");
        session
    }

    /// Look up a session by id. The registry lock is released before the
    /// handle is returned.
    pub fn find(&self, id: &SessionId) -> Option<Arc<CallSession>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Look up a session by its dialog id.
    pub fn find_by_dialog(&self, dialog_id: &str) -> Option<Arc<CallSession>> {
        let id = self.by_dialog.get(dialog_id)?.value().clone();
        self.find(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // -- Signaling-event routing ---------------------------------------

    /// Route an invite-session state change. A terminal state releases the
    /// session's resources and frees its slot.
    pub async fn on_state_changed(
        &self,
        dialog_id: &str,
        state: CallState,
        status: u16,
        reason: &str,
    ) {
        let Some(session) = self.find_by_dialog(dialog_id) else {
            debug!(dialog = dialog_id, "state change for unknown dialog");
            return;
        };
        session.on_state_changed(state, status, reason).await;

        if state == CallState::Disconnected {
            session.teardown().await;
            self.by_dialog.remove(dialog_id);
            self.sessions.remove(session.id());
            info!(session = %session.id(), remaining = self.sessions.len(), "session released");
        }
    }

    /// Route a completed offer/answer round.
    pub async fn on_media_update(
        &self,
        dialog_id: &str,
        local: SessionDescription,
        remote: SessionDescription,
    ) -> Result<()> {
        let session = self
            .find_by_dialog(dialog_id)
            .ok_or_else(|| SessionError::SessionNotFound {
                id: dialog_id.to_string(),
            })?;
        session.on_media_update(local, remote).await
    }

    /// Route a remote offer; returns our answer.
    pub async fn on_rx_offer(
        &self,
        dialog_id: &str,
        offer: &SessionDescription,
    ) -> Result<SessionDescription> {
        let session = self
            .find_by_dialog(dialog_id)
            .ok_or_else(|| SessionError::SessionNotFound {
                id: dialog_id.to_string(),
            })?;
        session.on_rx_offer(offer).await
    }

    /// The signaling layer needs an offer (initial or re-negotiation).
    pub async fn on_create_offer(&self, dialog_id: &str) -> Result<SessionDescription> {
        let session = self
            .find_by_dialog(dialog_id)
            .ok_or_else(|| SessionError::SessionNotFound {
                id: dialog_id.to_string(),
            })?;
        session.on_create_offer().await
    }

    /// Route transfer progress (REFER NOTIFY).
    pub async fn on_transfer_notify(&self, dialog_id: &str, status: u16, is_final: bool) {
        if let Some(session) = self.find_by_dialog(dialog_id) {
            session.on_transfer_notify(status, is_final).await;
        }
    }

    /// Route a redirect target; returns the application's decision.
    pub async fn on_redirected(&self, dialog_id: &str, target: &str) -> RedirectAction {
        match self.find_by_dialog(dialog_id) {
            Some(session) => session.on_redirected(target).await,
            None => {
                warn!(dialog = dialog_id, "redirect for unknown dialog");
                RedirectAction::Stop
            }
        }
    }

    /// Route an in-dialog MESSAGE to the application.
    pub fn on_message_received(&self, dialog_id: &str, body: &str) {
        if let Some(session) = self.find_by_dialog(dialog_id) {
            session.on_message_received(body);
        }
    }

    /// Route a typing indication to the application.
    pub fn on_typing_received(&self, dialog_id: &str, is_typing: bool) {
        if let Some(session) = self.find_by_dialog(dialog_id) {
            session.on_typing_received(is_typing);
        }
    }
}
