//! Secure media transport
//!
//! [`SecureMediaTransport`] wraps an underlying packet transport and owns
//! the active transmit/receive crypto contexts for one media line. From the
//! caller's point of view it is itself a [`MediaTransport`] (decorator); on
//! top of that it exposes the offer/answer negotiation hooks the media
//! session pipeline drives (`generate_offer`, `apply_offer`, `apply_answer`,
//! `media_start`, `media_stop`).
//!
//! Locking: all crypto state lives behind one mutex per transport. Send and
//! receive protect/unprotect under that lock into fixed-capacity scratch
//! buffers; the underlying transport is only awaited after the lock is
//! released. The autonomous replay recovery inside the receive path runs
//! entirely under the lock, so an application-driven `start`/`stop` cannot
//! interleave with it.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::SrtpContext;
use crate::error::{Result, SrtpError};
use crate::lifecycle;
use crate::policy::{CryptoPolicy, SrtpUse};
use crate::sdes::{self, CryptoAttribute};
use crate::suite;

/// Fixed capacity of each protect/unprotect scratch buffer
pub const SCRATCH_CAPACITY: usize = 1500;

/// Received packets forgiven as potential stream restarts after a (re)start
pub const PROBATION_CNT: u32 = 100;

/// Packet kind moving through the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}

/// Operating mode of the secure transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SrtpMode {
    /// Packets pass through unmodified
    Bypass,
    /// Packets are protected/unprotected by the active contexts
    Secured,
}

/// Per-media-line negotiation sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    OfferReceived,
    /// Offer/answer pair consumed, pending commit at media start
    AnswerPending,
    Committed,
}

/// Addresses for attaching the underlying transport
#[derive(Debug, Clone, Copy)]
pub struct AttachParams {
    pub local_rtp: SocketAddr,
    pub remote_rtp: SocketAddr,
    pub remote_rtcp: SocketAddr,
}

/// Read-only transport snapshot
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub local_rtp: SocketAddr,
    pub remote_rtp: SocketAddr,
    /// Present when the transport is a secure decorator
    pub srtp: Option<SrtpInfo>,
}

/// Diagnostics snapshot of the secure transport. Never carries key bytes;
/// wire-facing key encoding goes through the SDES attribute path only.
#[derive(Debug, Clone, Serialize)]
pub struct SrtpInfo {
    pub active: bool,
    pub mode: SrtpMode,
    pub local_use: SrtpUse,
    pub peer_use: SrtpUse,
    pub tx_suite: &'static str,
    pub rx_suite: &'static str,
    pub tx_key_len: usize,
    pub rx_key_len: usize,
}

/// Upstream consumer of packets leaving the transport on the receive path.
/// Registered by `attach`, cleared by `detach`.
pub trait PacketSink: Send + Sync {
    fn on_rx_rtp(&self, packet: &[u8]);
    fn on_rx_rtcp(&self, packet: &[u8]);
}

/// Contract of an underlying packet transport. The secure transport both
/// consumes this (its inner transport) and implements it (decorator).
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn attach(&self, params: AttachParams, sink: Arc<dyn PacketSink>) -> Result<()>;
    async fn detach(&self);
    async fn send_rtp(&self, packet: Bytes) -> Result<usize>;
    async fn send_rtcp(&self, packet: Bytes) -> Result<usize>;
    fn get_info(&self) -> TransportInfo;
    async fn close(&self) -> Result<()>;
}

/// Configuration surface passed in by the owner (account/media config).
#[derive(Debug, Clone)]
pub struct SrtpSetting {
    /// Local secure-media requirement
    pub use_policy: SrtpUse,
    /// Ordered offered suites, each optionally pre-provisioned with a key
    pub suites: Vec<CryptoPolicy>,
    /// Close the underlying transport when this one is closed
    pub close_inner: bool,
    /// Initial probation count applied on session (re)start
    pub probation: u32,
}

impl SrtpSetting {
    /// Setting for an explicit ordered suite list, by wire name.
    pub fn for_suites(use_policy: SrtpUse, names: &[&str]) -> Result<Self> {
        let mut suites = Vec::with_capacity(names.len());
        for name in names {
            let idx = suite::lookup(name)?;
            if idx != suite::NULL_SUITE {
                suites.push(CryptoPolicy::unkeyed(idx));
            }
        }
        if suites.is_empty() && use_policy == SrtpUse::Mandatory {
            return Err(SrtpError::NoUsableSuite);
        }
        Ok(Self {
            use_policy,
            suites,
            close_inner: true,
            probation: PROBATION_CNT,
        })
    }
}

impl Default for SrtpSetting {
    fn default() -> Self {
        Self {
            use_policy: SrtpUse::Optional,
            suites: vec![CryptoPolicy::unkeyed(1), CryptoPolicy::unkeyed(2)],
            close_inner: true,
            probation: PROBATION_CNT,
        }
    }
}

/// Fixed-capacity protection buffer. Oversized packets are rejected before
/// any cryptographic work touches them.
struct ScratchBuffer {
    buf: Box<[u8]>,
}

impl ScratchBuffer {
    fn new() -> Self {
        Self {
            buf: vec![0u8; SCRATCH_CAPACITY].into_boxed_slice(),
        }
    }

    fn claim(&mut self, needed: usize) -> Result<&mut [u8]> {
        if needed > self.buf.len() {
            return Err(SrtpError::TooLarge {
                len: needed,
                capacity: self.buf.len(),
            });
        }
        Ok(&mut self.buf)
    }
}

struct SrtpState {
    mode: SrtpMode,
    started: bool,
    attached: bool,
    closed: bool,

    tx_policy: CryptoPolicy,
    rx_policy: CryptoPolicy,
    tx_ctx: Option<SrtpContext>,
    rx_ctx: Option<SrtpContext>,

    // Negotiated-pending pair: exists only inside one offer/answer round.
    tx_pending: Option<CryptoPolicy>,
    rx_pending: Option<CryptoPolicy>,
    nego: NegotiationState,
    /// Policies we offered, ordered by tag (tag N is entry N-1)
    offered: Vec<CryptoPolicy>,

    probation: u32,
    peer_use: SrtpUse,

    sink: Option<Arc<dyn PacketSink>>,

    tx_rtp_scratch: ScratchBuffer,
    tx_rtcp_scratch: ScratchBuffer,
    rx_rtp_scratch: ScratchBuffer,
    rx_rtcp_scratch: ScratchBuffer,
}

/// SRTP decorator around an underlying media transport.
pub struct SecureMediaTransport {
    inner: Arc<dyn MediaTransport>,
    setting: SrtpSetting,
    state: Mutex<SrtpState>,
    self_weak: Weak<SecureMediaTransport>,
}

impl SecureMediaTransport {
    /// Wrap `inner`. The returned transport is in Bypass and not started.
    pub fn new(inner: Arc<dyn MediaTransport>, setting: SrtpSetting) -> Arc<Self> {
        lifecycle::ensure_initialized();
        Arc::new_cyclic(|weak| Self {
            inner,
            setting,
            state: Mutex::new(SrtpState {
                mode: SrtpMode::Bypass,
                started: false,
                attached: false,
                closed: false,
                tx_policy: CryptoPolicy::plain(),
                rx_policy: CryptoPolicy::plain(),
                tx_ctx: None,
                rx_ctx: None,
                tx_pending: None,
                rx_pending: None,
                nego: NegotiationState::Idle,
                offered: Vec::new(),
                probation: 0,
                peer_use: SrtpUse::Disabled,
                sink: None,
                tx_rtp_scratch: ScratchBuffer::new(),
                tx_rtcp_scratch: ScratchBuffer::new(),
                rx_rtp_scratch: ScratchBuffer::new(),
                rx_rtcp_scratch: ScratchBuffer::new(),
            }),
            self_weak: weak.clone(),
        })
    }

    /// Local configuration this transport was created with
    pub fn setting(&self) -> &SrtpSetting {
        &self.setting
    }

    /// Record the peer's declared secure-media requirement.
    pub fn set_peer_use(&self, peer_use: SrtpUse) {
        self.state.lock().peer_use = peer_use;
    }

    /// Peer's last declared secure-media requirement.
    pub fn peer_use(&self) -> SrtpUse {
        self.state.lock().peer_use
    }

    /// Install `tx`/`rx` as the active policies and (re)build the crypto
    /// contexts. Stop-then-start is atomic for callers: validation and
    /// context construction happen before the previous session is torn
    /// down, so a failed start leaves the old session running.
    pub fn start(&self, tx: CryptoPolicy, rx: CryptoPolicy) -> Result<()> {
        let mut st = self.state.lock();
        Self::start_locked(&self.setting, &mut st, tx, rx, true)
    }

    fn start_locked(
        setting: &SrtpSetting,
        st: &mut SrtpState,
        tx: CryptoPolicy,
        rx: CryptoPolicy,
        reset_probation: bool,
    ) -> Result<()> {
        if tx.suite >= suite::CRYPTO_SUITES.len() || rx.suite >= suite::CRYPTO_SUITES.len() {
            return Err(SrtpError::NoUsableSuite);
        }
        tx.validate()?;
        rx.validate()?;

        // Negotiating "no confidentiality, no authentication" must behave
        // exactly like plaintext, not like a degenerate encrypted mode.
        if tx.is_plain() && rx.is_plain() {
            Self::stop_locked(st);
            st.tx_policy = tx;
            st.rx_policy = rx;
            st.mode = SrtpMode::Bypass;
            st.started = true;
            if reset_probation {
                st.probation = setting.probation;
            }
            debug!("secure transport started in bypass mode");
            return Ok(());
        }

        let new_tx_ctx = if tx.is_plain() {
            None
        } else {
            Some(SrtpContext::new(&tx)?)
        };
        let new_rx_ctx = if rx.is_plain() {
            None
        } else {
            Some(SrtpContext::new(&rx)?)
        };

        Self::stop_locked(st);
        st.tx_ctx = new_tx_ctx;
        st.rx_ctx = new_rx_ctx;
        st.tx_policy = tx;
        st.rx_policy = rx;
        st.mode = SrtpMode::Secured;
        st.started = true;
        if reset_probation {
            st.probation = setting.probation;
        }
        info!(
            tx_suite = suite::get(st.tx_policy.suite).name,
            rx_suite = suite::get(st.rx_policy.suite).name,
            "SRTP session started"
        );
        Ok(())
    }

    /// Release both contexts and zero the active policies. Idempotent.
    pub fn stop(&self) {
        let mut st = self.state.lock();
        Self::stop_locked(&mut st);
    }

    fn stop_locked(st: &mut SrtpState) {
        st.tx_ctx = None;
        st.rx_ctx = None;
        st.tx_policy.clear();
        st.rx_policy.clear();
        st.mode = SrtpMode::Bypass;
        st.started = false;
    }

    /// Protect (if secured) and forward one packet.
    pub async fn send(&self, kind: PacketKind, packet: &[u8]) -> Result<usize> {
        let wire = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if !st.started {
                return Err(SrtpError::NotStarted);
            }
            let ctx = st.tx_ctx.as_mut();
            match (st.mode, ctx) {
                (SrtpMode::Bypass, _) | (_, None) => Bytes::copy_from_slice(packet),
                (SrtpMode::Secured, Some(ctx)) => {
                    let (scratch, n) = match kind {
                        PacketKind::Rtp => {
                            let needed = packet.len() + ctx.rtp_overhead();
                            let buf = st.tx_rtp_scratch.claim(needed)?;
                            let n = ctx.protect_rtp(packet, buf)?;
                            (buf, n)
                        }
                        PacketKind::Rtcp => {
                            let needed = packet.len() + ctx.rtcp_overhead();
                            let buf = st.tx_rtcp_scratch.claim(needed)?;
                            let n = ctx.protect_rtcp(packet, buf)?;
                            (buf, n)
                        }
                    };
                    Bytes::copy_from_slice(&scratch[..n])
                }
            }
        };
        match kind {
            PacketKind::Rtp => self.inner.send_rtp(wire).await,
            PacketKind::Rtcp => self.inner.send_rtcp(wire).await,
        }
    }

    /// Receive-path entry for RTP, invoked by the inner transport's sink.
    fn handle_rx(&self, kind: PacketKind, data: &[u8]) {
        let (forward, sink) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let sink = st.sink.clone();
            let forward = self.unprotect_locked(st, kind, data);
            (forward, sink)
        };
        // A dropped packet never reaches the upstream codec.
        if let (Some(bytes), Some(sink)) = (forward, sink) {
            match kind {
                PacketKind::Rtp => sink.on_rx_rtp(&bytes),
                PacketKind::Rtcp => sink.on_rx_rtcp(&bytes),
            }
        }
    }

    fn unprotect_locked(
        &self,
        st: &mut SrtpState,
        kind: PacketKind,
        data: &[u8],
    ) -> Option<Bytes> {
        if !st.started {
            debug!("dropping packet received before secure transport start");
            return None;
        }
        if st.mode == SrtpMode::Bypass || st.rx_ctx.is_none() {
            return Some(Bytes::copy_from_slice(data));
        }

        if kind == PacketKind::Rtp && st.probation > 0 {
            st.probation -= 1;
        }

        let first = Self::unprotect_once(st, kind, data);
        match first {
            Ok(bytes) => Some(bytes),
            Err(err) if kind == PacketKind::Rtp && err.is_replay() && st.probation > 0 => {
                // A stream restart (hold/unhold and friends) makes the far
                // end's sequence numbers look like a replay to a context
                // that was not told about the restart. While probation
                // lasts, rebuild the session from the last-known active
                // policies and retry the decrypt exactly once. Probation is
                // deliberately NOT reset here, so a genuine attacker runs
                // out of forgiveness.
                warn!(error = %err, probation = st.probation, "replay failure within probation, restarting SRTP session");
                let tx = st.tx_policy.clone();
                let rx = st.rx_policy.clone();
                match Self::start_locked(&self.setting, st, tx, rx, false) {
                    Ok(()) => match Self::unprotect_once(st, kind, data) {
                        Ok(bytes) => Some(bytes),
                        Err(err) => {
                            debug!(error = %err, "dropping packet after restart retry");
                            None
                        }
                    },
                    Err(err) => {
                        warn!(error = %err, "SRTP session restart failed");
                        None
                    }
                }
            }
            Err(err) => {
                debug!(error = %err, "dropping undecryptable packet");
                None
            }
        }
    }

    fn unprotect_once(st: &mut SrtpState, kind: PacketKind, data: &[u8]) -> Result<Bytes> {
        let ctx = st.rx_ctx.as_mut().ok_or(SrtpError::NotStarted)?;
        match kind {
            PacketKind::Rtp => {
                let buf = st.rx_rtp_scratch.claim(data.len())?;
                let n = ctx.unprotect_rtp(data, buf)?;
                Ok(Bytes::copy_from_slice(&buf[..n]))
            }
            PacketKind::Rtcp => {
                let buf = st.rx_rtcp_scratch.claim(data.len())?;
                let n = ctx.unprotect_rtcp(data, buf)?;
                Ok(Bytes::copy_from_slice(&buf[..n]))
            }
        }
    }

    // -- Offer/answer hooks --------------------------------------------

    /// Media-session creation hook: reset the per-round negotiation
    /// sub-state and record what is known about the peer's requirement.
    /// Any pending pair left over from an aborted round is discarded.
    pub fn media_create(&self, peer_use: SrtpUse) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.tx_pending = None;
        st.rx_pending = None;
        st.offered.clear();
        st.nego = NegotiationState::Idle;
        if peer_use > st.peer_use {
            st.peer_use = peer_use;
        }
    }

    /// Begin an offer round: clear any straddling pending pair and produce
    /// the crypto attribute lines for the outgoing offer, one per
    /// configured suite (or just the active policy when re-offering an
    /// established session).
    pub fn generate_offer(&self) -> Result<Vec<CryptoAttribute>> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.tx_pending = None;
        st.rx_pending = None;
        st.offered.clear();

        if self.setting.use_policy == SrtpUse::Disabled {
            st.nego = NegotiationState::OfferSent;
            return Ok(Vec::new());
        }

        let mut attrs = Vec::new();
        if st.started && !st.tx_policy.is_plain() {
            // Re-offer the established policy; re-keying mid-call would
            // force an avoidable media restart.
            let mut policy = st.tx_policy.clone();
            if let Some(attr) = sdes::generate_offer_attribute(&mut policy, 1)? {
                attrs.push(attr);
                st.offered.push(policy);
            }
        } else {
            for (i, configured) in self.setting.suites.iter().enumerate() {
                let mut policy = configured.clone();
                if let Some(attr) =
                    sdes::generate_offer_attribute(&mut policy, (i + 1) as u32)?
                {
                    attrs.push(attr);
                    st.offered.push(policy);
                }
            }
        }

        if attrs.is_empty() && self.setting.use_policy == SrtpUse::Mandatory {
            return Err(SrtpError::NoUsableSuite);
        }
        st.nego = NegotiationState::OfferSent;
        Ok(attrs)
    }

    /// Begin an offer round from attribute lines the media line already
    /// carries (a re-offer built from the active local SDP). The lines
    /// must be tagged 1..n in order, the way [`Self::generate_offer`]
    /// produces them.
    pub fn adopt_offer(&self, attrs: &[CryptoAttribute]) -> Result<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.tx_pending = None;
        st.rx_pending = None;
        st.offered.clear();

        for (i, attr) in attrs.iter().enumerate() {
            if attr.tag as usize != i + 1 {
                return Err(SrtpError::InvalidTag {
                    text: attr.tag.to_string(),
                });
            }
            let idx = suite::lookup(&attr.suite_name)?;
            let policy = CryptoPolicy::new(idx, attr.key.clone())?;
            policy.validate()?;
            st.offered.push(policy);
        }
        st.nego = NegotiationState::OfferSent;
        Ok(())
    }

    /// Consume the peer's answer to our offer. On success the negotiated
    /// policies are parked in the pending pair until [`Self::media_start`].
    pub fn apply_answer(&self, answer: &[CryptoAttribute]) -> Result<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;

        if answer.is_empty() {
            if self.setting.use_policy == SrtpUse::Mandatory {
                return Err(SrtpError::CryptoRequired);
            }
            st.tx_pending = Some(CryptoPolicy::plain());
            st.rx_pending = Some(CryptoPolicy::plain());
            st.nego = NegotiationState::AnswerPending;
            return Ok(());
        }
        if answer.len() > 1 {
            return Err(SrtpError::AmbiguousAnswer {
                count: answer.len(),
            });
        }

        let chosen = &answer[0];
        let idx = (chosen.tag as usize)
            .checked_sub(1)
            .filter(|i| *i < st.offered.len())
            .ok_or_else(|| SrtpError::InvalidTag {
                text: chosen.tag.to_string(),
            })?;
        let offered = &st.offered[idx];
        let offered_name = suite::get(offered.suite).name;
        if !chosen.suite_name.eq_ignore_ascii_case(offered_name) {
            return Err(SrtpError::SuiteMismatch {
                offered: offered_name.to_string(),
                answered: chosen.suite_name.clone(),
            });
        }

        let rx = CryptoPolicy::new(offered.suite, chosen.key.clone())?;
        rx.validate()?;
        st.tx_pending = Some(offered.clone());
        st.rx_pending = Some(rx);
        st.nego = NegotiationState::AnswerPending;
        Ok(())
    }

    /// Consume a remote offer's crypto attributes and produce our answer
    /// attribute (pinned to the offerer's tag), or `None` for a bypass
    /// answer. Duplicate tags are rejected before any suite matching.
    pub fn apply_offer(
        &self,
        offer: &[CryptoAttribute],
        peer_use: SrtpUse,
    ) -> Result<Option<CryptoAttribute>> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.tx_pending = None;
        st.rx_pending = None;
        st.peer_use = peer_use;
        st.nego = NegotiationState::OfferReceived;

        let mut seen_tags = Vec::with_capacity(offer.len());
        for attr in offer {
            if seen_tags.contains(&attr.tag) {
                return Err(SrtpError::DuplicateTag { tag: attr.tag });
            }
            seen_tags.push(attr.tag);
        }

        if self.setting.use_policy == SrtpUse::Disabled {
            st.nego = NegotiationState::AnswerPending;
            st.tx_pending = Some(CryptoPolicy::plain());
            st.rx_pending = Some(CryptoPolicy::plain());
            return Ok(None);
        }

        for attr in offer {
            let Ok(suite_idx) = suite::lookup(&attr.suite_name) else {
                continue;
            };
            let Some(local) = self
                .setting
                .suites
                .iter()
                .find(|p| p.suite == suite_idx)
            else {
                continue;
            };

            let rx = CryptoPolicy::new(suite_idx, attr.key.clone())?;
            rx.validate()?;
            // Keep the established transmit key when re-answering an
            // unchanged suite, so an identical re-offer round commits as a
            // no-op instead of forcing a session restart.
            let mut tx = if st.started
                && !st.tx_policy.is_plain()
                && st.tx_policy.suite == suite_idx
            {
                st.tx_policy.clone()
            } else {
                local.clone()
            };
            let answer = sdes::generate_offer_attribute(&mut tx, attr.tag)?
                .ok_or(SrtpError::NoUsableSuite)?;
            st.tx_pending = Some(tx);
            st.rx_pending = Some(rx);
            st.nego = NegotiationState::AnswerPending;
            return Ok(Some(answer));
        }

        // Nothing matched.
        if self.setting.use_policy == SrtpUse::Mandatory || peer_use == SrtpUse::Mandatory {
            return Err(SrtpError::CryptoRequired);
        }
        st.tx_pending = Some(CryptoPolicy::plain());
        st.rx_pending = Some(CryptoPolicy::plain());
        st.nego = NegotiationState::AnswerPending;
        Ok(None)
    }

    /// Commit the round: promote the pending pair to active, (re)starting
    /// the crypto session only when something actually changed. Returns
    /// whether a (re)start happened.
    pub fn media_start(&self) -> Result<bool> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let (tx, rx) = match (st.tx_pending.take(), st.rx_pending.take()) {
            (Some(tx), Some(rx)) => (tx, rx),
            _ => {
                // No negotiation round touched this line. First start on a
                // line without crypto negotiation runs in bypass.
                if st.started {
                    st.nego = NegotiationState::Committed;
                    return Ok(false);
                }
                (CryptoPolicy::plain(), CryptoPolicy::plain())
            }
        };

        if st.started && st.tx_policy == tx && st.rx_policy == rx {
            // Unrelated re-INVITE (e.g. session-timer refresh): the crypto
            // session is already correct, leave it alone.
            st.nego = NegotiationState::Committed;
            debug!("negotiated policies unchanged, keeping crypto session");
            return Ok(false);
        }

        Self::start_locked(&self.setting, st, tx, rx, true)?;
        st.nego = NegotiationState::Committed;
        Ok(true)
    }

    /// Stop the media session, discarding any pending pair.
    pub fn media_stop(&self) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.tx_pending = None;
        st.rx_pending = None;
        st.nego = NegotiationState::Idle;
        Self::stop_locked(st);
    }

    /// Current negotiation sub-state
    pub fn negotiation_state(&self) -> NegotiationState {
        self.state.lock().nego
    }

    /// Diagnostics snapshot. Raw key bytes are never exposed here.
    pub fn describe(&self) -> SrtpInfo {
        let st = self.state.lock();
        SrtpInfo {
            active: st.started,
            mode: st.mode,
            local_use: self.setting.use_policy,
            peer_use: st.peer_use,
            tx_suite: suite::get(st.tx_policy.suite).name,
            rx_suite: suite::get(st.rx_policy.suite).name,
            tx_key_len: st.tx_policy.key().len(),
            rx_key_len: st.rx_policy.key().len(),
        }
    }

    /// Stop, detach, and (per configuration) close the inner transport.
    pub async fn close(&self) -> Result<()> {
        {
            let mut st = self.state.lock();
            if st.closed {
                return Ok(());
            }
            st.closed = true;
            st.sink = None;
            Self::stop_locked(&mut st);
        }
        self.inner.detach().await;
        if self.setting.close_inner {
            self.inner.close().await?;
        }
        Ok(())
    }
}

impl Drop for SecureMediaTransport {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if !st.closed && st.attached {
            // Not critical enough to abort teardown, but worth surfacing.
            warn!("secure media transport dropped while still attached");
        }
        lifecycle::release();
    }
}

/// Sink registered on the inner transport; decrypts and forwards upstream.
struct InnerSink {
    srtp: Weak<SecureMediaTransport>,
}

impl PacketSink for InnerSink {
    fn on_rx_rtp(&self, packet: &[u8]) {
        if let Some(srtp) = self.srtp.upgrade() {
            srtp.handle_rx(PacketKind::Rtp, packet);
        }
    }

    fn on_rx_rtcp(&self, packet: &[u8]) {
        if let Some(srtp) = self.srtp.upgrade() {
            srtp.handle_rx(PacketKind::Rtcp, packet);
        }
    }
}

#[async_trait]
impl MediaTransport for SecureMediaTransport {
    async fn attach(&self, params: AttachParams, sink: Arc<dyn PacketSink>) -> Result<()> {
        self.state.lock().sink = Some(sink);
        let inner_sink = Arc::new(InnerSink {
            srtp: self.self_weak.clone(),
        });
        self.inner.attach(params, inner_sink).await?;
        self.state.lock().attached = true;
        Ok(())
    }

    async fn detach(&self) {
        {
            let mut st = self.state.lock();
            st.sink = None;
            st.attached = false;
        }
        self.inner.detach().await;
    }

    async fn send_rtp(&self, packet: Bytes) -> Result<usize> {
        self.send(PacketKind::Rtp, &packet).await
    }

    async fn send_rtcp(&self, packet: Bytes) -> Result<usize> {
        self.send(PacketKind::Rtcp, &packet).await
    }

    fn get_info(&self) -> TransportInfo {
        let mut info = self.inner.get_info();
        info.srtp = Some(self.describe());
        info
    }

    async fn close(&self) -> Result<()> {
        SecureMediaTransport::close(self).await
    }
}
