//! Shared test doubles: an in-memory invite dialog, a null media wire, and
//! collecting callbacks.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use ringline_call_core::dialog::{DialogError, InviteDialog, RenegotiateMethod};
use ringline_call_core::sdp::{MediaDescription, MediaFormat, SessionDescription};
use ringline_call_core::{CallInfo, CallState, MediaStatus, SessionCallbacks};
use ringline_srtp_core::{
    AttachParams, CryptoAttribute, MediaTransport, PacketSink, TransportInfo,
};

/// Scripted invite dialog standing in for the signaling layer.
pub struct MockDialog {
    pub dialog_id: String,
    pub supports_update: bool,
    /// Error every `send_offer` returns while set
    pub fail_offers_with: Mutex<Option<DialogError>>,
    pub offer_attempts: Mutex<Vec<(RenegotiateMethod, SessionDescription)>>,
    pub offers_sent: Mutex<Vec<(RenegotiateMethod, SessionDescription)>>,
    pub answers_sent: Mutex<Vec<(u16, Option<SessionDescription>)>>,
    pub refers: Mutex<Vec<String>>,
    pub terminated: Mutex<Option<u16>>,
    pub messages: Mutex<Vec<String>>,
    pub typing: Mutex<Vec<bool>>,
}

impl MockDialog {
    pub fn new(supports_update: bool) -> Arc<Self> {
        Arc::new(Self {
            dialog_id: format!("dlg-{}", uuid_like()),
            supports_update,
            fail_offers_with: Mutex::new(None),
            offer_attempts: Mutex::new(Vec::new()),
            offers_sent: Mutex::new(Vec::new()),
            answers_sent: Mutex::new(Vec::new()),
            refers: Mutex::new(Vec::new()),
            terminated: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
        })
    }
}

fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    format!("{:08x}", NEXT.fetch_add(1, Ordering::Relaxed))
}

#[async_trait]
impl InviteDialog for MockDialog {
    fn id(&self) -> &str {
        &self.dialog_id
    }

    fn remote_has_capability(&self, capability: &str) -> bool {
        capability == "UPDATE" && self.supports_update
    }

    async fn send_offer(
        &self,
        method: RenegotiateMethod,
        offer: SessionDescription,
    ) -> Result<(), DialogError> {
        self.offer_attempts.lock().push((method, offer.clone()));
        if let Some(err) = self.fail_offers_with.lock().clone() {
            return Err(err);
        }
        self.offers_sent.lock().push((method, offer));
        Ok(())
    }

    async fn send_answer(
        &self,
        status: u16,
        answer: Option<SessionDescription>,
    ) -> Result<(), DialogError> {
        self.answers_sent.lock().push((status, answer));
        Ok(())
    }

    async fn respond(&self, _status: u16, _reason: &str) -> Result<(), DialogError> {
        Ok(())
    }

    async fn terminate(&self, status: u16) -> Result<(), DialogError> {
        *self.terminated.lock() = Some(status);
        Ok(())
    }

    async fn send_refer(&self, target: &str) -> Result<(), DialogError> {
        self.refers.lock().push(target.to_string());
        Ok(())
    }

    async fn notify_transfer_progress(
        &self,
        _status: u16,
        _is_final: bool,
    ) -> Result<(), DialogError> {
        Ok(())
    }

    async fn send_message(&self, _mime: &str, body: String) -> Result<(), DialogError> {
        self.messages.lock().push(body);
        Ok(())
    }

    async fn send_typing(&self, is_typing: bool) -> Result<(), DialogError> {
        self.typing.lock().push(is_typing);
        Ok(())
    }
}

/// Media wire that goes nowhere.
pub struct NullWire;

#[async_trait]
impl MediaTransport for NullWire {
    async fn attach(
        &self,
        _params: AttachParams,
        _sink: Arc<dyn PacketSink>,
    ) -> ringline_srtp_core::Result<()> {
        Ok(())
    }

    async fn detach(&self) {}

    async fn send_rtp(&self, packet: Bytes) -> ringline_srtp_core::Result<usize> {
        Ok(packet.len())
    }

    async fn send_rtcp(&self, packet: Bytes) -> ringline_srtp_core::Result<usize> {
        Ok(packet.len())
    }

    fn get_info(&self) -> TransportInfo {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        TransportInfo {
            local_rtp: addr,
            remote_rtp: addr,
            srtp: None,
        }
    }

    async fn close(&self) -> ringline_srtp_core::Result<()> {
        Ok(())
    }
}

/// Callback recorder.
#[derive(Default)]
pub struct Recorder {
    pub call_states: Mutex<Vec<CallState>>,
    pub media_states: Mutex<Vec<MediaStatus>>,
    pub transfer_events: Mutex<Vec<(u16, bool)>>,
    pub im_statuses: Mutex<Vec<(String, bool)>>,
}

impl SessionCallbacks for Recorder {
    fn on_call_state(&self, info: &CallInfo) {
        self.call_states.lock().push(info.state);
    }

    fn on_media_state(&self, info: &CallInfo) {
        self.media_states.lock().push(info.media_status);
    }

    fn on_transfer_status(&self, status: u16, is_final: bool) -> bool {
        self.transfer_events.lock().push((status, is_final));
        true
    }

    fn on_im_status(&self, body: &str, delivered: bool) {
        self.im_statuses.lock().push((body.to_string(), delivered));
    }
}

/// Standard audio formats: two real codecs plus signalling formats.
pub fn audio_formats() -> Vec<MediaFormat> {
    vec![
        MediaFormat::new(0, "PCMU", 8000),
        MediaFormat::new(8, "PCMA", 8000),
        MediaFormat::new(13, "CN", 8000),
        MediaFormat::new(101, "telephone-event", 8000),
    ]
}

/// Local media prototype with one audio line.
pub fn prototype() -> SessionDescription {
    SessionDescription::new(vec![MediaDescription::audio(4000, audio_formats())])
}

/// A remote answer to `offer`: echoes formats (optionally truncated to
/// `keep_real` real codecs) and answers the first crypto line, if any,
/// with a fresh key.
pub fn remote_answer(offer: &SessionDescription, keep_real: usize) -> SessionDescription {
    let mut answer = offer.clone();
    for m in answer.media.iter_mut() {
        let mut real_seen = 0usize;
        m.formats.retain(|f| {
            if f.is_signalling() {
                return true;
            }
            real_seen += 1;
            real_seen <= keep_real
        });
        m.direction = m.direction.reversed();
        if let Some(first) = m.crypto.first().cloned() {
            let key: Vec<u8> = (1..=30).collect();
            m.crypto = vec![CryptoAttribute {
                tag: first.tag,
                suite_name: first.suite_name,
                key,
            }];
        }
    }
    answer
}
