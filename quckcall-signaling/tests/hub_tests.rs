use quckcall_signaling::{
    CallId, CallRef, ConversationId, IceCandidate, IceCandidateMessage, IceServer, InitiateCall,
    MediaKind, ParticipantId, SessionDescription, SignalingError, SignalingHub, SignalingMessage,
    SignalingTransport, SignalingTransportExt,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("{}=trace,quckcall_signaling=trace", module_path!()))
        .try_init();
}

fn create_hub() -> SignalingHub {
    SignalingHub::new(vec![IceServer::stun("stun:stun.example.org:3478")])
}

#[tokio::test]
async fn test_initiate_assigns_call_id_and_rings_participants() {
    init_tracing();
    let hub = create_hub();
    let (alice, _alice_rx) = hub.connect(ParticipantId::from("alice"));
    let (_bob, mut bob_rx) = hub.connect(ParticipantId::from("bob"));

    let reply = alice
        .initiate(InitiateCall {
            conversation_id: ConversationId::from("conv-1"),
            participant_ids: vec![ParticipantId::from("bob")],
            media_kind: MediaKind::Video,
        })
        .await
        .unwrap();
    assert!(!reply.call_id.as_str().is_empty());
    assert_eq!(reply.ice_servers.len(), 1);
    assert_eq!(hub.active_calls(), 1);

    match bob_rx.recv().await.unwrap() {
        SignalingMessage::Incoming(incoming) => {
            assert_eq!(incoming.call_id, reply.call_id);
            assert_eq!(incoming.from_participant, ParticipantId::from("alice"));
            assert_eq!(incoming.media_kind, MediaKind::Video);
            assert_eq!(incoming.conversation_id, ConversationId::from("conv-1"));
        }
        other => panic!("Expected call:incoming, got {other:?}"),
    }
}

#[tokio::test]
async fn test_answer_notifies_initiator() {
    init_tracing();
    let hub = create_hub();
    let (alice, mut alice_rx) = hub.connect(ParticipantId::from("alice"));
    let (bob, mut bob_rx) = hub.connect(ParticipantId::from("bob"));
    let reply = alice
        .initiate(InitiateCall {
            conversation_id: ConversationId::from("conv-1"),
            participant_ids: vec![ParticipantId::from("bob")],
            media_kind: MediaKind::Audio,
        })
        .await
        .unwrap();
    let _ = bob_rx.recv().await.unwrap();

    let answer = bob.answer(reply.call_id.clone()).await.unwrap();
    assert_eq!(answer.ice_servers, reply.ice_servers);

    match alice_rx.recv().await.unwrap() {
        SignalingMessage::Accepted(accepted) => {
            assert_eq!(accepted.call_id, reply.call_id);
            assert_eq!(accepted.participant_id, ParticipantId::from("bob"));
        }
        other => panic!("Expected call:accepted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_relay_stamps_sender() {
    init_tracing();
    let hub = create_hub();
    let (alice, _alice_rx) = hub.connect(ParticipantId::from("alice"));
    let (_bob, mut bob_rx) = hub.connect(ParticipantId::from("bob"));

    alice
        .emit(SignalingMessage::Offer(SessionDescription {
            call_id: CallId::from("c1"),
            target_participant: ParticipantId::from("bob"),
            from_participant: None,
            sdp: "v=0\r\n".into(),
        }))
        .await
        .unwrap();
    alice
        .emit(SignalingMessage::IceCandidate(IceCandidateMessage {
            call_id: CallId::from("c1"),
            target_participant: ParticipantId::from("bob"),
            from_participant: None,
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            },
        }))
        .await
        .unwrap();

    match bob_rx.recv().await.unwrap() {
        SignalingMessage::Offer(offer) => {
            assert_eq!(offer.from_participant, Some(ParticipantId::from("alice")));
        }
        other => panic!("Expected webrtc:offer, got {other:?}"),
    }
    match bob_rx.recv().await.unwrap() {
        SignalingMessage::IceCandidate(candidate) => {
            assert_eq!(candidate.from_participant, Some(ParticipantId::from("alice")));
            assert_eq!(candidate.candidate.sdp_m_line_index, Some(0));
        }
        other => panic!("Expected webrtc:ice-candidate, got {other:?}"),
    }
}

#[tokio::test]
async fn test_offline_transport_fails_fast() {
    init_tracing();
    let hub = create_hub();
    let alice_id = ParticipantId::from("alice");
    let (alice, _alice_rx) = hub.connect(alice_id.clone());
    hub.set_online(&alice_id, false);
    assert!(!alice.is_connected());

    let err = alice
        .emit(SignalingMessage::End(CallRef::new(CallId::from("c1"))))
        .await
        .unwrap_err();
    assert!(matches!(err, SignalingError::Unavailable));
    assert!(err.is_retryable());

    hub.set_online(&alice_id, true);
    assert!(alice.is_connected());
}

#[tokio::test]
async fn test_answer_for_unknown_call_is_rejected() {
    init_tracing();
    let hub = create_hub();
    let (bob, _bob_rx) = hub.connect(ParticipantId::from("bob"));
    let err = bob.answer(CallId::from("missing")).await.unwrap_err();
    match err {
        SignalingError::Rejected { event, reason } => {
            assert_eq!(event, "call:answer");
            assert!(reason.contains("missing"));
        }
        other => panic!("Expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_end_is_relayed_and_call_forgotten() {
    init_tracing();
    let hub = create_hub();
    let (alice, _alice_rx) = hub.connect(ParticipantId::from("alice"));
    let (_bob, mut bob_rx) = hub.connect(ParticipantId::from("bob"));
    let reply = alice
        .initiate(InitiateCall {
            conversation_id: ConversationId::from("conv-1"),
            participant_ids: vec![ParticipantId::from("bob")],
            media_kind: MediaKind::Audio,
        })
        .await
        .unwrap();
    let _ = bob_rx.recv().await.unwrap();

    alice
        .emit(SignalingMessage::End(CallRef::new(reply.call_id.clone())))
        .await
        .unwrap();
    assert_eq!(hub.active_calls(), 0);
    match bob_rx.recv().await.unwrap() {
        SignalingMessage::End(end) => assert_eq!(end.call_id, reply.call_id),
        other => panic!("Expected call:end, got {other:?}"),
    }
}

#[tokio::test]
async fn test_group_call_survives_one_reject() {
    init_tracing();
    let hub = create_hub();
    let (alice, mut alice_rx) = hub.connect(ParticipantId::from("alice"));
    let (bob, mut bob_rx) = hub.connect(ParticipantId::from("bob"));
    let (carol, mut carol_rx) = hub.connect(ParticipantId::from("carol"));
    let reply = alice
        .initiate(InitiateCall {
            conversation_id: ConversationId::from("conv-1"),
            participant_ids: vec![ParticipantId::from("bob"), ParticipantId::from("carol")],
            media_kind: MediaKind::Audio,
        })
        .await
        .unwrap();
    let _ = bob_rx.recv().await.unwrap();
    let _ = carol_rx.recv().await.unwrap();

    bob.emit(SignalingMessage::Reject(CallRef::new(reply.call_id.clone())))
        .await
        .unwrap();
    assert_eq!(hub.active_calls(), 1);
    for rx in [&mut alice_rx, &mut carol_rx] {
        match rx.recv().await.unwrap() {
            SignalingMessage::Rejected(rejected) => {
                assert_eq!(rejected.participant_id, ParticipantId::from("bob"));
            }
            other => panic!("Expected call:rejected, got {other:?}"),
        }
    }

    carol.answer(reply.call_id.clone()).await.unwrap();
    carol
        .emit(SignalingMessage::Reject(CallRef::new(reply.call_id)))
        .await
        .unwrap();
    assert_eq!(hub.active_calls(), 0);
}
