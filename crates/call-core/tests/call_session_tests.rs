//! Call session lifecycle and secure-media mediation tests

mod common;

use std::sync::Arc;

use ringline_call_core::sdp::{MediaDirection, TransportProfile};
use ringline_call_core::{
    CallManager, CallRole, CallState, MediaStatus, SessionConfig, SessionError,
};
use ringline_srtp_core::{MediaTransport, SrtpSetting, SrtpUse};

use common::{prototype, remote_answer, MockDialog, NullWire, Recorder};

fn config(use_policy: SrtpUse) -> SessionConfig {
    SessionConfig {
        srtp: SrtpSetting {
            use_policy,
            ..SrtpSetting::default()
        },
    }
}

fn media() -> Vec<Arc<dyn MediaTransport>> {
    vec![Arc::new(NullWire)]
}

#[tokio::test]
async fn caller_offer_carries_crypto_under_optional_policy() {
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let m = &offer.media[0];
    // Optional with no prior peer requirement offers plain AVP plus
    // crypto attributes for each configured suite.
    assert_eq!(m.profile, TransportProfile::RtpAvp);
    assert_eq!(m.crypto.len(), 2);
    assert_eq!(m.crypto[0].tag, 1);
    assert_eq!(m.crypto[0].suite_name, "AES_CM_128_HMAC_SHA1_80");
    assert_eq!(m.crypto[1].tag, 2);
}

#[tokio::test]
async fn mandatory_policy_offers_savp() {
    let manager = CallManager::new(config(SrtpUse::Mandatory));
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog, Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    assert_eq!(offer.media[0].profile, TransportProfile::RtpSavp);
}

#[tokio::test]
async fn full_round_activates_srtp() {
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let recorder = Arc::new(Recorder::default());
    let session = manager.make_call(dialog.clone(), recorder.clone(), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let answer = remote_answer(&offer, 1);

    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(offer.clone(), answer).await.unwrap();

    let info = session.info().await;
    assert_eq!(info.media_status, MediaStatus::Active);
    let srtp = info.srtp.unwrap();
    assert!(srtp.active);
    assert_eq!(srtp.tx_suite, "AES_CM_128_HMAC_SHA1_80");
    assert_eq!(recorder.media_states.lock().last(), Some(&MediaStatus::Active));
}

#[tokio::test]
async fn plain_answer_under_optional_policy_stays_bypass() {
    // Scenario E flavor, offerer side: peer strips our crypto lines.
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog, Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let mut answer = remote_answer(&offer, 1);
    answer.media[0].crypto.clear();

    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(offer, answer).await.unwrap();

    let info = session.info().await;
    assert_eq!(info.media_status, MediaStatus::Active);
    let srtp = info.srtp.unwrap();
    assert!(srtp.active);
    assert_eq!(srtp.mode, ringline_srtp_core::SrtpMode::Bypass);
}

#[tokio::test]
async fn mandatory_caller_fails_on_crypto_free_answer() {
    let manager = CallManager::new(config(SrtpUse::Mandatory));
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let mut answer = remote_answer(&offer, 1);
    answer.media[0].crypto.clear();
    answer.media[0].profile = TransportProfile::RtpAvp;

    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    let err = session.on_media_update(offer, answer).await.unwrap_err();
    assert!(err.is_security_failure());
    // The call was ended with a negotiation-specific rejection, not left
    // half-configured.
    assert_eq!(*dialog.terminated.lock(), Some(488));
}

#[tokio::test]
async fn callee_answers_plain_offer_without_error() {
    // Scenario E: Optional policy, remote offer is plain RTP/AVP.
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let session =
        manager.incoming_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());
    assert_eq!(session.role(), CallRole::Callee);

    let offer = prototype();
    let answer = session.on_rx_offer(&offer).await.unwrap();
    let am = &answer.media[0];
    assert!(am.is_active());
    assert_eq!(am.profile, TransportProfile::RtpAvp);
    assert!(am.crypto.is_empty());

    session.on_media_update(answer.clone(), offer).await.unwrap();
    let info = session.info().await;
    assert_eq!(info.media_status, MediaStatus::Active);
    assert_eq!(info.srtp.unwrap().mode, ringline_srtp_core::SrtpMode::Bypass);
}

#[tokio::test]
async fn callee_secures_offer_with_crypto() {
    let caller_mgr = CallManager::new(config(SrtpUse::Optional));
    let caller_dlg = MockDialog::new(true);
    let caller = caller_mgr.make_call(caller_dlg, Arc::new(Recorder::default()), prototype(), media());
    let offer = caller.on_create_offer().await.unwrap();

    let callee_mgr = CallManager::new(config(SrtpUse::Optional));
    let callee_dlg = MockDialog::new(true);
    let callee =
        callee_mgr.incoming_call(callee_dlg.clone(), Arc::new(Recorder::default()), prototype(), media());

    let answer = callee.on_rx_offer(&offer).await.unwrap();
    let am = &answer.media[0];
    assert_eq!(am.crypto.len(), 1);
    assert_eq!(am.crypto[0].tag, 1);

    // Callee commits; caller applies the answer and commits.
    callee.on_media_update(answer.clone(), offer.clone()).await.unwrap();
    caller.on_media_update(offer, answer).await.unwrap();

    assert!(callee.info().await.srtp.unwrap().active);
    assert!(caller.info().await.srtp.unwrap().active);

    // The callee can answer 200 with the stored SDP.
    callee.answer(200).await.unwrap();
    let sent = callee_dlg.answers_sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 200);
    assert!(sent[0].1.is_some());
}

#[tokio::test]
async fn mandatory_callee_deactivates_plain_offer_line() {
    let manager = CallManager::new(config(SrtpUse::Mandatory));
    let dialog = MockDialog::new(true);
    let session =
        manager.incoming_call(dialog, Arc::new(Recorder::default()), prototype(), media());

    // Only line is plain: the whole answer fails with the security error.
    let offer = prototype();
    let err = session.on_rx_offer(&offer).await.unwrap_err();
    assert!(err.is_security_failure());
}

#[tokio::test]
async fn hold_and_resume_flip_direction() {
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let recorder = Arc::new(Recorder::default());
    let session = manager.make_call(dialog.clone(), recorder.clone(), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let answer = remote_answer(&offer, 1);
    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(offer, answer).await.unwrap();

    session.hold().await.unwrap();
    let (_, hold_offer) = dialog.offers_sent.lock().last().cloned().unwrap();
    assert_eq!(hold_offer.media[0].direction, MediaDirection::SendOnly);
    assert!(hold_offer.version > 1);

    // Peer accepts the hold.
    let hold_answer = remote_answer(&hold_offer, 1);
    session
        .on_media_update(hold_offer.clone(), hold_answer)
        .await
        .unwrap();
    assert_eq!(session.info().await.media_status, MediaStatus::LocalHold);

    session.resume().await.unwrap();
    let (_, resume_offer) = dialog.offers_sent.lock().last().cloned().unwrap();
    assert_eq!(resume_offer.media[0].direction, MediaDirection::SendRecv);
    let resume_answer = remote_answer(&resume_offer, 1);
    session
        .on_media_update(resume_offer, resume_answer)
        .await
        .unwrap();
    assert_eq!(session.info().await.media_status, MediaStatus::Active);
}

#[tokio::test]
async fn remote_hold_is_reported() {
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog, Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();
    let mut answer = remote_answer(&offer, 1);
    answer.media[0].direction = MediaDirection::SendOnly;

    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(offer, answer).await.unwrap();
    assert_eq!(session.info().await.media_status, MediaStatus::RemoteHold);
}

#[tokio::test]
async fn state_changes_record_timing_and_status() {
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let recorder = Arc::new(Recorder::default());
    let session = manager.make_call(dialog.clone(), recorder.clone(), prototype(), media());
    let dialog_id = dialog.dialog_id.clone();

    manager.on_state_changed(&dialog_id, CallState::Calling, 0, "").await;
    manager.on_state_changed(&dialog_id, CallState::Early, 180, "Ringing").await;
    manager.on_state_changed(&dialog_id, CallState::Confirmed, 200, "OK").await;

    let info = session.info().await;
    assert!(info.response_time.is_some());
    assert!(info.connect_time.is_some());
    assert_eq!(info.last_status, 200);
    assert_eq!(info.last_reason, "OK");

    manager
        .on_state_changed(&dialog_id, CallState::Disconnected, 200, "OK")
        .await;
    assert!(session.info().await.disconnect_time.is_some());
    // The terminal state released the slot.
    assert_eq!(manager.session_count(), 0);
    assert!(manager.find_by_dialog(&dialog_id).is_none());
    assert_eq!(
        recorder.call_states.lock().as_slice(),
        [
            CallState::Calling,
            CallState::Early,
            CallState::Confirmed,
            CallState::Disconnected
        ]
    );
}

#[tokio::test]
async fn transfer_refers_and_hangs_up_on_success() {
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let recorder = Arc::new(Recorder::default());
    let session = manager.make_call(dialog.clone(), recorder.clone(), prototype(), media());

    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.transfer("sip:carol@example.com").await.unwrap();
    assert_eq!(dialog.refers.lock().as_slice(), ["sip:carol@example.com"]);

    session.on_transfer_notify(100, false).await;
    session.on_transfer_notify(200, true).await;
    assert_eq!(
        recorder.transfer_events.lock().as_slice(),
        [(100, false), (200, true)]
    );
    // Transferee reached the target: our leg hangs up.
    assert!(dialog.terminated.lock().is_some());
}

#[tokio::test]
async fn dtmf_requires_negotiated_telephone_event() {
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog, Arc::new(Recorder::default()), prototype(), media());

    let offer = session.on_create_offer().await.unwrap();

    // Answer keeps telephone-event: digits map to the negotiated PT.
    let answer = remote_answer(&offer, 1);
    session.on_state_changed(CallState::Confirmed, 200, "OK").await;
    session.on_media_update(offer.clone(), answer).await.unwrap();
    assert_eq!(session.dial_dtmf("123#").await.unwrap(), 101);

    // Answer without telephone-event: in-band fallback error.
    let mut bare = remote_answer(&offer, 1);
    bare.media[0]
        .formats
        .retain(|f| !f.encoding.eq_ignore_ascii_case("telephone-event"));
    session.on_media_update(offer, bare).await.unwrap();
    assert!(matches!(
        session.dial_dtmf("1").await,
        Err(SessionError::DtmfUnavailable)
    ));
}

#[tokio::test]
async fn messaging_side_channel_reports_delivery() {
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let recorder = Arc::new(Recorder::default());
    let session = manager.make_call(dialog.clone(), recorder.clone(), prototype(), media());

    session.send_message("hello there".to_string()).await.unwrap();
    assert_eq!(dialog.messages.lock().as_slice(), ["hello there"]);
    assert_eq!(
        recorder.im_statuses.lock().as_slice(),
        [("hello there".to_string(), true)]
    );

    session.send_typing(true).await.unwrap();
    assert_eq!(dialog.typing.lock().as_slice(), [true]);
}

#[tokio::test]
async fn lookup_then_detach_returns_live_handles() {
    let manager = CallManager::new(config(SrtpUse::Optional));
    let dialog = MockDialog::new(true);
    let session = manager.make_call(dialog.clone(), Arc::new(Recorder::default()), prototype(), media());

    let found = manager.find(session.id()).unwrap();
    assert_eq!(found.id(), session.id());
    let by_dialog = manager.find_by_dialog(dialog.dialog_id.as_str()).unwrap();
    assert_eq!(by_dialog.id(), session.id());
    assert_eq!(manager.session_count(), 1);
}
