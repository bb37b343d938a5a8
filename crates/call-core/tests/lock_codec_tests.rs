//! Codec lock controller tests
//!
//! Time is paused: the retry timer's sleeps auto-advance, so the bounded
//! retry schedule runs in milliseconds of wall time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use ringline_call_core::dialog::{DialogError, RenegotiateMethod};
use ringline_call_core::{CallManager, CallState, SessionConfig};
use ringline_srtp_core::{MediaTransport, SrtpSetting, SrtpUse};

use common::{prototype, remote_answer, MockDialog, NullWire, Recorder};

fn config() -> SessionConfig {
    SessionConfig {
        srtp: SrtpSetting {
            use_policy: SrtpUse::Optional,
            ..SrtpSetting::default()
        },
    }
}

fn media() -> Vec<Arc<dyn MediaTransport>> {
    vec![Arc::new(NullWire)]
}

async fn settle() {
    // Let the zero-delay timer task and any rescheduled retries run.
    tokio::time::sleep(Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn multi_codec_answer_triggers_single_stripped_reoffer() {
    // Scenario D, happy path: answer keeps 2 real codecs (of our 2), the
    // controller sends exactly one re-offer restricted to the first.
    let manager = CallManager::new(config());
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let answer = remote_answer(&offer, 2);
    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(offer.clone(), answer).await.unwrap();
    settle().await;

    let sent = dialog.offers_sent.lock().clone();
    assert_eq!(sent.len(), 1, "exactly one lock re-offer");
    let (method, sdp) = &sent[0];
    // Remote supports UPDATE, so the lighter method is used.
    assert_eq!(*method, RenegotiateMethod::Update);
    assert_eq!(sdp.media[0].real_format_count(), 1);
    assert_eq!(sdp.media[0].formats[0].encoding, "PCMU");
    // Signalling formats survive the strip.
    assert!(sdp.media[0]
        .formats
        .iter()
        .any(|f| f.encoding == "telephone-event"));
    assert!(sdp.version > offer.version);
}

#[tokio::test(start_paused = true)]
async fn single_codec_answer_needs_no_lock() {
    let manager = CallManager::new(config());
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let answer = remote_answer(&offer, 1);
    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(offer, answer).await.unwrap();
    settle().await;

    assert!(dialog.offers_sent.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn answerer_side_never_locks() {
    let manager = CallManager::new(config());
    let dialog = MockDialog::new(true);
    let session = manager.incoming_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());

    // Remote offers multiple codecs; we answer (possibly multi-codec).
    let offer = prototype();
    let answer = session.on_rx_offer(&offer).await.unwrap();
    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(answer, offer).await.unwrap();
    settle().await;

    // The offer-receiver leaves codec locking to the peer.
    assert!(dialog.offers_sent.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_collisions_retry_then_give_up_silently() {
    // Scenario D, collision path: every send hits an in-flight
    // negotiation. After the bounded retries the controller abandons the
    // lock and the call goes on with multiple codecs.
    let manager = CallManager::new(config());
    let dialog = MockDialog::new(true);
    let recorder = Arc::new(Recorder::default());
    let session = manager.make_call(dialog.clone(), recorder.clone(), prototype(), media());
    *dialog.fail_offers_with.lock() = Some(DialogError::NegotiationInFlight);

    let offer = session.on_create_offer().await.unwrap();
    let answer = remote_answer(&offer, 2);
    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(offer, answer).await.unwrap();
    settle().await;

    let attempts = dialog.offer_attempts.lock().len();
    assert_eq!(attempts, 5, "bounded at five send attempts");
    assert!(dialog.offers_sent.lock().is_empty());
    // The failure is silent: the call was not torn down.
    assert!(dialog.terminated.lock().is_none());
}

#[tokio::test(start_paused = true)]
async fn early_state_defers_lock_until_confirmed_without_update_support() {
    let manager = CallManager::new(config());
    let dialog = MockDialog::new(false); // no UPDATE support
    let session = manager.make_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let answer = remote_answer(&offer, 2);
    session.on_state_changed(CallState::Early, 183, "Session Progress").await;
    session.on_media_update(offer, answer).await.unwrap();
    settle().await;

    // Nothing sent while Early.
    assert!(dialog.offer_attempts.lock().is_empty());

    // Confirmation releases the deferred lock, via re-INVITE.
    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    settle().await;
    let sent = dialog.offers_sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, RenegotiateMethod::Reinvite);
    assert_eq!(sent[0].1.media[0].real_format_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn interim_negotiation_makes_the_lock_obsolete() {
    let manager = CallManager::new(config());
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let answer = remote_answer(&offer, 2);
    session.on_state_changed(CallState::Confirmed, 200, "OK").await;

    // First send collides, arming the 200 ms retry timer.
    *dialog.fail_offers_with.lock() = Some(DialogError::NegotiationInFlight);
    session.on_media_update(offer.clone(), answer).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dialog.offer_attempts.lock().len(), 1);
    *dialog.fail_offers_with.lock() = None;

    // Before the retry fires, the peer completes an independent
    // renegotiation (e.g. a refresh) that we merely answer.
    let mut reoffer = offer.clone();
    reoffer.version = offer.version + 5;
    let local_answer = session.on_rx_offer(&reoffer).await.unwrap();
    session
        .on_media_update(local_answer, reoffer)
        .await
        .unwrap();

    settle().await;
    // The obsolete lock update was dropped, not sent.
    assert_eq!(dialog.offer_attempts.lock().len(), 1);
    assert!(dialog.offers_sent.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_the_retry_timer() {
    let manager = CallManager::new(config());
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());
    let dialog_id = dialog.dialog_id.clone();
    *dialog.fail_offers_with.lock() = Some(DialogError::NegotiationInFlight);

    let offer = session.on_create_offer().await.unwrap();
    let answer = remote_answer(&offer, 2);
    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(offer, answer).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dialog.offer_attempts.lock().len(), 1);

    // Disconnect while the retry timer is armed: cancellation is
    // synchronous with teardown, so no further attempt may fire.
    manager
        .on_state_changed(&dialog_id, CallState::Disconnected, 200, "OK")
        .await;
    settle().await;
    assert_eq!(dialog.offer_attempts.lock().len(), 1);
}
