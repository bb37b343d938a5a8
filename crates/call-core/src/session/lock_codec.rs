//! Codec lock controller
//!
//! A callee may legitimately answer with more than one codec. Downstream
//! codec selection is undefined with multiple active formats, so the
//! answer-receiving side drives one follow-up negotiation that pins the
//! session to the first real format. Sending can collide with an in-flight
//! negotiation (session timers, a concurrent re-INVITE); collisions are
//! retried on a short one-shot timer, bounded, and exhaustion degrades
//! silently: the call proceeds with multiple codecs rather than dying.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::types::{CallState, MediaStatus};
use crate::dialog::{DialogError, RenegotiateMethod, CAP_UPDATE};
use crate::errors::Result;
use crate::media::security::decorate_offer_line;
use crate::session::call::{CallSession, NegotiationRound};

/// Bounded retries before the lock attempt is abandoned
pub const CODEC_LOCK_MAX_RETRY: u32 = 5;

/// Fixed interval between retries after a send collision
pub const CODEC_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Codec-lock sub-state owned by the call session.
pub(crate) struct LockCodecState {
    /// Lock deferred until the dialog confirms
    pub pending: bool,
    pub retry_cnt: u32,
    /// Local SDP version the controller last acted on; a newer version
    /// means an independent negotiation finished and ours is obsolete
    pub sdp_ver: u64,
    /// The single outstanding retry timer, if any
    pub timer: Option<JoinHandle<()>>,
}

impl LockCodecState {
    pub fn new() -> Self {
        Self {
            pending: false,
            retry_cnt: 0,
            sdp_ver: 0,
            timer: None,
        }
    }
}

impl CallSession {
    /// Inspect the freshly committed answer and, when it kept several real
    /// codecs, arrange the follow-up negotiation. Only the side that
    /// received the answer locks.
    pub(crate) async fn check_codec_lock(self: &Arc<Self>) {
        self.cancel_codec_lock_timer();

        let local_ver = {
            let st = self.state.read().await;
            if st.round != NegotiationRound::WeOffered {
                return;
            }
            if st.media_status == MediaStatus::None
                || st.media_status == MediaStatus::Error
            {
                return;
            }
            let Some(idx) = st.audio_idx else {
                return;
            };
            let Some(rm) = st.active_remote.as_ref().and_then(|r| r.media.get(idx)) else {
                return;
            };

            if rm.real_format_count() <= 1 {
                // Answer settled on a single codec; reset the budget.
                self.lock_codec.lock().retry_cnt = 0;
                return;
            }

            // In the Early state the dialog cannot carry a re-INVITE yet;
            // without UPDATE support the lock waits for confirmation.
            if st.call_state == CallState::Early
                && !self.dialog.remote_has_capability(CAP_UPDATE)
            {
                self.lock_codec.lock().pending = true;
                debug!(session = %self.id(), "codec lock deferred until dialog confirms");
                return;
            }

            st.active_local.as_ref().map(|s| s.version).unwrap_or(0)
        };

        {
            let mut lc = self.lock_codec.lock();
            lc.retry_cnt += 1;
            if lc.retry_cnt > CODEC_LOCK_MAX_RETRY {
                // Remote keeps answering with multiple codecs; stop here
                // rather than looping forever.
                debug!(session = %self.id(), "codec lock retries exhausted, keeping multiple codecs");
                return;
            }
            lc.sdp_ver = local_ver;
        }

        info!(session = %self.id(), "answer kept multiple codecs, scheduling re-offer to lock one");
        // Sending from inside the media-update callback would re-enter the
        // negotiation machinery, so even the first attempt goes through
        // the timer.
        self.schedule_codec_lock(Duration::ZERO);
    }

    /// Timer body: build and send the single-codec re-offer.
    pub(crate) async fn perform_codec_lock(self: &Arc<Self>) -> Result<()> {
        let built = {
            let mut st = self.state.write().await;
            if st.call_state.is_terminating() || st.call_state > CallState::Confirmed {
                return Ok(());
            }
            if st.media_status == MediaStatus::None
                || st.media_status == MediaStatus::Error
            {
                return Ok(());
            }
            let acted_ver = self.lock_codec.lock().sdp_ver;
            let Some(active) = st.active_local.clone() else {
                return Ok(());
            };
            if active.version > acted_ver {
                // An independently negotiated SDP superseded the one we
                // inspected; our update is obsolete and simply dropped.
                debug!(session = %self.id(), acted = acted_ver, current = active.version,
                       "codec lock obsolete, dropping");
                return Ok(());
            }
            let Some(idx) = st.audio_idx else {
                return Ok(());
            };

            let mut sdp = active;
            let Some(m) = sdp.media.get_mut(idx) else {
                return Ok(());
            };
            if !m.retain_first_real_format() {
                return Ok(());
            }
            sdp.bump_version();
            for (i, m) in sdp.media.iter_mut().enumerate() {
                if !m.is_active() {
                    continue;
                }
                if let Some(t) = self.transports().get(i) {
                    m.crypto.clear();
                    decorate_offer_line(m, t)?;
                }
            }
            st.round = NegotiationRound::WeOffered;
            sdp
        };

        let method = if self.dialog().remote_has_capability(CAP_UPDATE) {
            RenegotiateMethod::Update
        } else {
            RenegotiateMethod::Reinvite
        };

        match self.dialog().send_offer(method, built).await {
            Ok(()) => {
                debug!(session = %self.id(), ?method, "codec lock re-offer sent");
                Ok(())
            }
            Err(DialogError::NegotiationInFlight) => {
                let retry = {
                    let mut lc = self.lock_codec.lock();
                    lc.retry_cnt += 1;
                    lc.retry_cnt <= CODEC_LOCK_MAX_RETRY
                };
                if retry {
                    debug!(session = %self.id(), "negotiation in flight, rescheduling codec lock");
                    self.schedule_codec_lock(CODEC_LOCK_RETRY_INTERVAL);
                } else {
                    debug!(session = %self.id(), "codec lock abandoned after send collisions");
                }
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.id(), error = %e, "codec lock re-offer failed");
                Err(e.into())
            }
        }
    }

    /// Arm the single-shot retry timer. At most one is outstanding per
    /// session; a second request while armed is a no-op.
    pub(crate) fn schedule_codec_lock(self: &Arc<Self>, delay: Duration) {
        let mut lc = self.lock_codec.lock();
        if lc.timer.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        lc.timer = Some(tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            let Some(session) = weak.upgrade() else {
                return;
            };
            session.lock_codec.lock().timer = None;
            if let Err(e) = session.perform_codec_lock().await {
                warn!(session = %session.id(), error = %e, "codec lock attempt failed");
            }
        }));
    }

    /// Abort the retry timer, synchronously. Called on teardown and before
    /// every fresh inspection.
    pub(crate) fn cancel_codec_lock_timer(&self) {
        let mut lc = self.lock_codec.lock();
        if let Some(timer) = lc.timer.take() {
            timer.abort();
        }
    }
}
