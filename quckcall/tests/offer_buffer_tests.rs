mod common;

use common::{TestClient, create_hub, ring, settle};
use quckcall::call::EndReason;
use quckcall::models::CallPhase;
use quckcall_signaling::{
    MediaKind, SessionDescription, SignalingMessage, SignalingTransport, SignalingTransportExt,
};
use tracing_test::traced_test;

const SECOND_OFFER: &str = "v=0\r\n\
    o=- 2 2 IN IP4 127.0.0.1\r\n\
    s=renegotiated\r\n\
    t=0 0\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
    a=rtpmap:111 opus/48000/2\r\n";

#[tokio::test]
#[traced_test]
async fn test_offer_waits_for_accept_and_is_dropped_on_reject() {
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let mut bob = TestClient::connect(&hub, "bob");
    let call_id = ring(&mut alice, &mut bob, MediaKind::Audio).await;

    assert!(bob.engine.offers().contains(&call_id));
    assert_eq!(bob.engine.offers().len(), 1);
    assert!(bob.engine.peers().is_empty());
    assert!(!bob.engine.has_local_media());

    bob.engine.reject_call(&call_id).await.unwrap();
    assert!(bob.engine.offers().is_empty());
    assert!(bob.peers.log().created.is_empty());
    assert!(bob.peers.log().remote_descriptions.is_empty());

    settle(&mut alice, &mut bob).await;
    assert_eq!(alice.listener.ended(), vec![(call_id, EndReason::RemoteRejected)]);
}

#[tokio::test]
#[traced_test]
async fn test_newer_offer_replaces_buffered_one() {
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let mut bob = TestClient::connect(&hub, "bob");
    let call_id = ring(&mut alice, &mut bob, MediaKind::Audio).await;

    hub.deliver(
        &"bob".into(),
        SignalingMessage::Offer(SessionDescription {
            call_id: call_id.clone(),
            target_participant: "bob".into(),
            from_participant: Some("alice".into()),
            sdp: SECOND_OFFER.to_owned(),
        }),
    );
    bob.pump().await;
    assert_eq!(bob.engine.offers().len(), 1);

    bob.engine.accept_call(&call_id).await.unwrap();
    let offers = bob.peers.log().remote_offers_for(&"alice".into());
    assert_eq!(offers, vec![SECOND_OFFER.to_owned()]);
    // The early candidate belonged to the replaced offer.
    assert!(bob.peers.log().remote_candidates.is_empty());

    settle(&mut alice, &mut bob).await;
    assert_eq!(bob.phase(), CallPhase::Connected);
    assert_eq!(alice.phase(), CallPhase::Connected);
}

#[tokio::test]
#[traced_test]
async fn test_malformed_offer_only_drops_its_link() {
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let mut bob = TestClient::connect(&hub, "bob");
    let call_id = ring(&mut alice, &mut bob, MediaKind::Audio).await;

    let offer_from_alice = |sdp: &str| {
        SignalingMessage::Offer(SessionDescription {
            call_id: call_id.clone(),
            target_participant: "bob".into(),
            from_participant: Some("alice".into()),
            sdp: sdp.to_owned(),
        })
    };
    hub.deliver(&"bob".into(), offer_from_alice("not a session description"));
    bob.pump().await;
    bob.engine.accept_call(&call_id).await.unwrap();

    assert_eq!(bob.phase(), CallPhase::Connecting);
    assert!(bob.listener.ended().is_empty());
    assert!(bob.engine.peers().is_empty());
    assert_eq!(bob.peers.log().close_count(&"alice".into()), 1);
    assert!(logs_contain("Remote description rejected"));

    settle(&mut alice, &mut bob).await;
    assert_eq!(alice.phase(), CallPhase::Connecting);
    assert!(alice.listener.ended().is_empty());

    // A later valid offer renegotiates on a fresh link.
    hub.deliver(&"bob".into(), offer_from_alice(SECOND_OFFER));
    settle(&mut alice, &mut bob).await;
    assert_eq!(
        bob.peers.log().remote_offers_for(&"alice".into()),
        vec![SECOND_OFFER.to_owned()]
    );
    assert_eq!(bob.phase(), CallPhase::Connected);
    assert_eq!(alice.phase(), CallPhase::Connected);
    assert!(bob.listener.ended().is_empty());
    assert!(alice.listener.ended().is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_offer_to_dialing_caller_is_answered_after_accept() {
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let (bob, mut bob_stream) = hub.connect("bob".into());

    let call_id = alice
        .engine
        .start_call("conv-1".into(), vec!["bob".into()], MediaKind::Audio)
        .await
        .unwrap();
    bob.emit(SignalingMessage::Offer(SessionDescription {
        call_id: call_id.clone(),
        target_participant: "alice".into(),
        from_participant: None,
        sdp: SECOND_OFFER.to_owned(),
    }))
    .await
    .unwrap();
    alice.pump().await;
    assert_eq!(alice.phase(), CallPhase::Dialing);
    assert!(alice.engine.offers().contains(&call_id));
    assert!(alice.peers.log().remote_offers_for(&"bob".into()).is_empty());

    bob.answer(call_id.clone()).await.unwrap();
    alice.pump().await;
    // Both descriptions are set on the loopback link, so it connects at once.
    assert_eq!(
        alice.listener.phases(),
        vec![CallPhase::Dialing, CallPhase::Connecting, CallPhase::Connected]
    );
    assert!(alice.engine.offers().is_empty());
    assert_eq!(
        alice.peers.log().remote_offers_for(&"bob".into()),
        vec![SECOND_OFFER.to_owned()]
    );

    let mut answers = Vec::new();
    while let Some(message) = bob_stream.try_recv() {
        if let SignalingMessage::SdpAnswer(answer) = message {
            answers.push(answer);
        }
    }
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].call_id, call_id);
    assert_eq!(answers[0].from_participant, Some("alice".into()));
}
