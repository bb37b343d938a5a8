//! Call session state machine
//!
//! One [`CallSession`] owns a call's lifecycle: the borrowed signaling
//! dialog, the per-media-line secure transports, offer/answer mediation,
//! hold/resume, transfer, redirect, and the DTMF/instant-message side
//! channels. The signaling layer drives it through the invite-session
//! callbacks (`on_state_changed`, `on_media_update`, `on_rx_offer`,
//! `on_create_offer`, `on_transfer_notify`); applications drive it through
//! the command methods and observe it through [`SessionCallbacks`].

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ringline_srtp_core::{SecureMediaTransport, SrtpError, SrtpUse};

use crate::api::types::{
    CallInfo, CallRole, CallState, MediaStatus, RedirectAction, SessionCallbacks,
    SessionConfig, SessionId,
};
use crate::dialog::{InviteDialog, RenegotiateMethod};
use crate::errors::{Result, SessionError};
use crate::media::security::{answer_offer_line, apply_answer_line, decorate_offer_line};
use crate::sdp::{MediaDirection, MediaFormat, SessionDescription};
use crate::session::lock_codec::LockCodecState;

/// Which side produced the offer of the most recent offer/answer round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NegotiationRound {
    None,
    WeOffered,
    TheyOffered,
}

pub(crate) struct SessionState {
    pub call_state: CallState,
    pub media_status: MediaStatus,
    pub direction: MediaDirection,
    pub local_hold: bool,
    pub audio_idx: Option<usize>,
    pub active_local: Option<SessionDescription>,
    pub active_remote: Option<SessionDescription>,
    pub pending_answer: Option<SessionDescription>,
    pub round: NegotiationRound,
    pub response_time: Option<Instant>,
    pub connect_time: Option<Instant>,
    pub disconnect_time: Option<Instant>,
    pub last_status: u16,
    pub last_reason: String,
    pub transfer_active: bool,
}

/// One call: signaling dialog (borrowed), secure media transports (owned),
/// negotiation state, codec-lock sub-state.
pub struct CallSession {
    id: SessionId,
    role: CallRole,
    pub(crate) dialog: Arc<dyn InviteDialog>,
    callbacks: Arc<dyn SessionCallbacks>,
    pub(crate) config: SessionConfig,
    /// Local media template from the media allocation layer (ports,
    /// supported formats). Offers and answers are built from it.
    prototype: SessionDescription,
    /// Per-media-line secure transports, index-aligned with SDP lines
    pub(crate) transports: Vec<Arc<SecureMediaTransport>>,
    pub(crate) state: RwLock<SessionState>,
    pub(crate) lock_codec: Mutex<LockCodecState>,
}

impl CallSession {
    pub fn new(
        role: CallRole,
        dialog: Arc<dyn InviteDialog>,
        callbacks: Arc<dyn SessionCallbacks>,
        config: SessionConfig,
        prototype: SessionDescription,
        transports: Vec<Arc<SecureMediaTransport>>,
    ) -> Arc<Self> {
        let id = SessionId::new();
        info!(session = %id, dialog = dialog.id(), ?role, "call session created");
        Arc::new(Self {
            id,
            role,
            dialog,
            callbacks,
            config,
            prototype,
            transports,
            state: RwLock::new(SessionState {
                call_state: CallState::Null,
                media_status: MediaStatus::None,
                direction: MediaDirection::Inactive,
                local_hold: false,
                audio_idx: None,
                active_local: None,
                active_remote: None,
                pending_answer: None,
                round: NegotiationRound::None,
                response_time: None,
                connect_time: None,
                disconnect_time: None,
                last_status: 0,
                last_reason: String::new(),
                transfer_active: false,
            }),
            lock_codec: Mutex::new(LockCodecState::new()),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn dialog(&self) -> &Arc<dyn InviteDialog> {
        &self.dialog
    }

    pub(crate) fn transports(&self) -> &[Arc<SecureMediaTransport>] {
        &self.transports
    }

    /// Read-only snapshot for applications and diagnostics.
    pub async fn info(&self) -> CallInfo {
        let st = self.state.read().await;
        let srtp = st
            .audio_idx
            .and_then(|i| self.transports.get(i))
            .map(|t| t.describe());
        CallInfo {
            id: self.id.clone(),
            role: self.role,
            state: st.call_state,
            media_status: st.media_status,
            direction: st.direction,
            response_time: st.response_time,
            connect_time: st.connect_time,
            disconnect_time: st.disconnect_time,
            last_status: st.last_status,
            last_reason: st.last_reason.clone(),
            srtp,
        }
    }

    // -- Invite-session callbacks (driven by the signaling layer) -------

    /// The signaling layer needs an offer from us: the initial INVITE body
    /// or a re-INVITE/UPDATE it is composing.
    pub async fn on_create_offer(&self) -> Result<SessionDescription> {
        self.build_local_offer().await
    }

    /// A remote offer arrived; produce our answer. Media lines that fail
    /// security negotiation are deactivated individually; the call only
    /// fails when no line survives.
    pub async fn on_rx_offer(&self, offer: &SessionDescription) -> Result<SessionDescription> {
        let mut st = self.state.write().await;
        if st.call_state.is_terminating() {
            return Err(SessionError::InvalidState {
                operation: "rx_offer",
                state: format!("{:?}", st.call_state),
            });
        }

        let template = st
            .active_local
            .clone()
            .unwrap_or_else(|| self.prototype.clone());
        let mut answer = SessionDescription {
            version: if st.active_local.is_some() {
                template.version + 1
            } else {
                template.version
            },
            media: Vec::with_capacity(offer.media.len()),
        };

        let mut security_err: Option<SessionError> = None;
        for (i, om) in offer.media.iter().enumerate() {
            let mut am = template.media.get(i).cloned().unwrap_or_else(|| {
                let mut mirror = om.clone();
                mirror.deactivate();
                mirror
            });

            if !om.is_active() || !am.is_active() {
                am.deactivate();
                answer.media.push(am);
                continue;
            }

            am.formats = echo_supported_formats(&am.formats, &om.formats);
            if am.real_format_count() == 0 {
                am.deactivate();
                answer.media.push(am);
                continue;
            }
            am.direction = om.direction.reversed();
            am.crypto.clear();

            if let Some(t) = self.transports.get(i) {
                if let Err(e) = answer_offer_line(om, &mut am, t) {
                    warn!(session = %self.id, line = i, error = %e,
                          "security negotiation failed, deactivating media line");
                    am.deactivate();
                    if security_err.is_none() {
                        security_err = Some(e);
                    }
                }
            }
            answer.media.push(am);
        }

        st.round = NegotiationRound::TheyOffered;
        if let Some(err) = security_err {
            st.media_status = MediaStatus::Error;
            if answer.media.iter().all(|m| !m.is_active()) {
                return Err(err);
            }
        }
        st.pending_answer = Some(answer.clone());
        Ok(answer)
    }

    /// An offer/answer round completed: `local`/`remote` are the active
    /// session descriptions. Commits crypto policies (restarting only on
    /// change), recomputes hold/direction state, then lets the codec-lock
    /// controller inspect the answer.
    pub async fn on_media_update(
        self: &Arc<Self>,
        local: SessionDescription,
        remote: SessionDescription,
    ) -> Result<()> {
        let mut first_err: Option<SessionError> = None;
        let we_offered;
        {
            let mut st = self.state.write().await;
            let prefer_secure = self.config.srtp.use_policy != SrtpUse::Disabled;
            st.audio_idx = remote.audio_index(prefer_secure);
            we_offered = st.round == NegotiationRound::WeOffered;

            let lines = local.media.len().min(remote.media.len());
            for i in 0..lines {
                let lm = &local.media[i];
                let rm = &remote.media[i];
                let Some(t) = self.transports.get(i) else {
                    continue;
                };
                if !lm.is_active() || !rm.is_active() {
                    t.media_stop();
                    continue;
                }

                let line_result = (|| -> Result<()> {
                    if we_offered {
                        if rm.crypto.is_empty()
                            && self.config.srtp.use_policy == SrtpUse::Mandatory
                        {
                            return Err(SrtpError::CryptoRequired.into());
                        }
                        apply_answer_line(rm, t)?;
                    }
                    t.media_start()?;
                    Ok(())
                })();

                if let Err(e) = line_result {
                    warn!(session = %self.id, line = i, error = %e,
                          "media start failed, stopping line");
                    t.media_stop();
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }

            let (status, direction) =
                compute_media_state(&st, &local, &remote, first_err.is_some());
            st.media_status = status;
            st.direction = direction;
            st.active_local = Some(local);
            st.active_remote = Some(remote);
        }

        self.notify_media_state().await;

        if let Some(err) = first_err {
            // A Mandatory-policy mismatch ends the call with the distinct
            // security reason; anything softer leaves the call up with the
            // affected line dead.
            if err.is_security_failure()
                && self.config.srtp.use_policy == SrtpUse::Mandatory
            {
                let _ = self.dialog.terminate(488).await;
                return Err(err);
            }
            return Err(err);
        }

        if we_offered {
            self.check_codec_lock().await;
        }
        Ok(())
    }

    /// Signaling state transition from the invite session.
    pub async fn on_state_changed(self: &Arc<Self>, new_state: CallState, status: u16, reason: &str) {
        {
            let mut st = self.state.write().await;
            debug!(session = %self.id, from = ?st.call_state, to = ?new_state, status, "call state");
            st.call_state = new_state;
            if status != 0 {
                st.last_status = status;
                st.last_reason = reason.to_string();
            }
            match new_state {
                CallState::Early | CallState::Connecting => {
                    if st.response_time.is_none() {
                        st.response_time = Some(Instant::now());
                    }
                }
                CallState::Confirmed => {
                    st.connect_time = Some(Instant::now());
                }
                CallState::Disconnected => {
                    if st.response_time.is_none() {
                        st.response_time = Some(Instant::now());
                    }
                    st.disconnect_time = Some(Instant::now());
                }
                _ => {}
            }
        }

        match new_state {
            CallState::Confirmed => {
                // A codec lock deferred from the Early state runs now.
                let deferred = {
                    let mut lc = self.lock_codec.lock();
                    std::mem::take(&mut lc.pending)
                };
                if deferred {
                    self.check_codec_lock().await;
                }
            }
            CallState::Disconnected => {
                // An orphaned timer firing after the session is gone is a
                // correctness bug; cancellation is synchronous with
                // teardown.
                self.cancel_codec_lock_timer();
            }
            _ => {}
        }

        self.notify_call_state().await;
    }

    /// The call received a 3xx; ask the application what to do with the
    /// target. The signaling layer acts on the returned decision.
    pub async fn on_redirected(&self, target: &str) -> RedirectAction {
        let action = self.callbacks.on_redirect(target);
        debug!(session = %self.id, target, ?action, "redirect decision");
        action
    }

    /// Transfer progress NOTIFY from the transferee's signaling.
    pub async fn on_transfer_notify(self: &Arc<Self>, status: u16, is_final: bool) {
        let keep_following = self.callbacks.on_transfer_status(status, is_final);
        if is_final {
            let succeeded = (200..300).contains(&status);
            self.state.write().await.transfer_active = false;
            if succeeded {
                // The transferee reached the target; our leg is done.
                info!(session = %self.id, "transfer succeeded, hanging up");
                let _ = self.hangup().await;
            }
        } else if !keep_following {
            self.state.write().await.transfer_active = false;
        }
    }

    /// Instant message delivered to us inside the dialog.
    pub fn on_message_received(&self, body: &str) {
        self.callbacks.on_incoming_message(body);
    }

    /// Peer's typing indication.
    pub fn on_typing_received(&self, is_typing: bool) {
        self.callbacks.on_typing(is_typing);
    }

    // -- Application commands -------------------------------------------

    /// Answer an incoming call: provisional (< 200) without SDP, final
    /// (2xx) with the answer built by `on_rx_offer`.
    pub async fn answer(&self, status: u16) -> Result<()> {
        if self.role != CallRole::Callee {
            return Err(SessionError::InvalidState {
                operation: "answer",
                state: "caller side".to_string(),
            });
        }
        let sdp = if status >= 200 {
            let st = self.state.read().await;
            st.pending_answer.clone()
        } else {
            None
        };
        self.dialog.send_answer(status, sdp).await?;
        Ok(())
    }

    /// Put the call on hold: re-offer with `sendonly` media.
    pub async fn hold(&self) -> Result<()> {
        {
            let mut st = self.state.write().await;
            if st.call_state != CallState::Confirmed {
                return Err(SessionError::InvalidState {
                    operation: "hold",
                    state: format!("{:?}", st.call_state),
                });
            }
            if st.local_hold {
                return Ok(());
            }
            st.local_hold = true;
        }
        let offer = self.build_local_offer().await?;
        self.dialog
            .send_offer(RenegotiateMethod::Reinvite, offer)
            .await?;
        Ok(())
    }

    /// Resume a held call.
    pub async fn resume(&self) -> Result<()> {
        {
            let mut st = self.state.write().await;
            if !st.local_hold {
                return Ok(());
            }
            st.local_hold = false;
        }
        let offer = self.build_local_offer().await?;
        self.dialog
            .send_offer(RenegotiateMethod::Reinvite, offer)
            .await?;
        Ok(())
    }

    /// Blind transfer: REFER the peer to `target`. Progress arrives via
    /// `on_transfer_notify`.
    pub async fn transfer(&self, target: &str) -> Result<()> {
        {
            let mut st = self.state.write().await;
            if st.call_state != CallState::Confirmed {
                return Err(SessionError::InvalidState {
                    operation: "transfer",
                    state: format!("{:?}", st.call_state),
                });
            }
            st.transfer_active = true;
        }
        self.dialog.send_refer(target).await?;
        Ok(())
    }

    /// End the call. Cancels the codec-lock timer before signaling so no
    /// retry can fire into a dying session.
    pub async fn hangup(&self) -> Result<()> {
        self.cancel_codec_lock_timer();
        {
            let mut st = self.state.write().await;
            if st.call_state >= CallState::Disconnecting {
                return Ok(());
            }
            st.call_state = CallState::Disconnecting;
        }
        self.dialog.terminate(200).await?;
        Ok(())
    }

    /// Queue RFC 2833 digits toward the media layer. Returns the
    /// negotiated telephone-event payload type; without one the caller
    /// must fall back to in-band tones, signalled as an error here.
    pub async fn dial_dtmf(&self, digits: &str) -> Result<u8> {
        if digits.is_empty() {
            return Err(SessionError::InvalidState {
                operation: "dial_dtmf",
                state: "empty digit string".to_string(),
            });
        }
        let st = self.state.read().await;
        let idx = st.audio_idx.ok_or(SessionError::NoAudioLine)?;
        let remote = st.active_remote.as_ref().ok_or(SessionError::NoAudioLine)?;
        remote
            .media
            .get(idx)
            .and_then(|m| m.telephone_event_pt())
            .ok_or(SessionError::DtmfUnavailable)
    }

    /// Send an instant message inside the dialog.
    pub async fn send_message(&self, body: String) -> Result<()> {
        let outcome = self.dialog.send_message("text/plain", body.clone()).await;
        self.callbacks.on_im_status(&body, outcome.is_ok());
        outcome.map_err(Into::into)
    }

    /// Send a typing indication inside the dialog.
    pub async fn send_typing(&self, is_typing: bool) -> Result<()> {
        self.dialog.send_typing(is_typing).await.map_err(Into::into)
    }

    // -- Internals ------------------------------------------------------

    /// Build an offer from the active local SDP (or the prototype for the
    /// first round), applying the hold direction and fresh crypto lines.
    pub(crate) async fn build_local_offer(&self) -> Result<SessionDescription> {
        let mut st = self.state.write().await;
        let mut sdp = st
            .active_local
            .clone()
            .unwrap_or_else(|| self.prototype.clone());
        if st.active_local.is_some() {
            sdp.bump_version();
        }
        for (i, m) in sdp.media.iter_mut().enumerate() {
            if !m.is_active() {
                continue;
            }
            m.direction = if st.local_hold {
                MediaDirection::SendOnly
            } else {
                MediaDirection::SendRecv
            };
            if let Some(t) = self.transports.get(i) {
                m.crypto.clear();
                decorate_offer_line(m, t)?;
            }
        }
        st.round = NegotiationRound::WeOffered;
        Ok(sdp)
    }

    /// Stop and release everything the session owns. Idempotent; called
    /// when the dialog reaches its terminal state.
    pub async fn teardown(&self) {
        self.cancel_codec_lock_timer();
        for t in &self.transports {
            t.media_stop();
            if let Err(e) = t.close().await {
                warn!(session = %self.id, error = %e, "transport close failed");
            }
        }
        debug!(session = %self.id, "session torn down");
    }

    async fn notify_call_state(&self) {
        let info = self.info().await;
        self.callbacks.on_call_state(&info);
    }

    async fn notify_media_state(&self) {
        let info = self.info().await;
        self.callbacks.on_media_state(&info);
    }
}

/// Answer formats: echo the offerer's payload types for every encoding we
/// support locally, preserving the offer's ordering.
fn echo_supported_formats(ours: &[MediaFormat], offered: &[MediaFormat]) -> Vec<MediaFormat> {
    offered
        .iter()
        .filter(|of| {
            ours.iter().any(|lf| {
                lf.encoding.eq_ignore_ascii_case(&of.encoding) && lf.clock_rate == of.clock_rate
            })
        })
        .cloned()
        .collect()
}

fn compute_media_state(
    st: &SessionState,
    local: &SessionDescription,
    remote: &SessionDescription,
    had_error: bool,
) -> (MediaStatus, MediaDirection) {
    if had_error {
        return (MediaStatus::Error, MediaDirection::Inactive);
    }
    let Some(idx) = st.audio_idx else {
        return (MediaStatus::None, MediaDirection::Inactive);
    };
    let (Some(lm), Some(rm)) = (local.media.get(idx), remote.media.get(idx)) else {
        return (MediaStatus::None, MediaDirection::Inactive);
    };
    if !lm.is_active() || !rm.is_active() {
        return (MediaStatus::None, MediaDirection::Inactive);
    }

    let status = if st.local_hold
        || lm.direction == MediaDirection::SendOnly
        || (lm.direction == MediaDirection::Inactive && st.local_hold)
    {
        MediaStatus::LocalHold
    } else if rm.direction == MediaDirection::SendOnly
        || rm.direction == MediaDirection::Inactive
    {
        MediaStatus::RemoteHold
    } else {
        MediaStatus::Active
    };
    (status, lm.direction)
}
