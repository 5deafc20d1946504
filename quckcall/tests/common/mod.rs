#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use quckcall::call::{CallEngine, CallListener, EndReason, EngineParts, EventReceiver};
use quckcall::config::EngineConfig;
use quckcall::models::{CallPhase, DateTime, MediaFlags, PendingCallRecord, PendingStatus};
use quckcall::native::{ChannelTelephony, NativeRequest};
use quckcall::peer::loopback::{LoopbackMedia, LoopbackPeerFactory};
use quckcall::peer::{MediaTrack, TrackKind};
use quckcall::storage::MemoryStore;
use quckcall_signaling::{
    CallId, IceServer, MediaKind, ParticipantId, SignalingHub, SignalingStream,
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("quckcall=trace,quckcall_signaling=debug")
        .try_init();
}

pub fn create_hub() -> SignalingHub {
    SignalingHub::new(vec![IceServer::stun("stun:stun.example.org:3478")])
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Incoming(CallId),
    Outgoing(CallId),
    Phase(CallPhase),
    Connected(CallId),
    Ended(CallId, EndReason),
    Track(ParticipantId, TrackKind),
    Media(ParticipantId, MediaFlags),
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Observed>>,
}

impl RecordingListener {
    fn record(&self, event: Observed) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }

    pub fn phases(&self) -> Vec<CallPhase> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Phase(phase) => Some(*phase),
                _ => None,
            })
            .collect()
    }

    pub fn ended(&self) -> Vec<(CallId, EndReason)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Ended(call_id, reason) => Some((call_id.clone(), *reason)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl CallListener for RecordingListener {
    async fn on_incoming_call(&self, call_id: &CallId, _caller_label: &str, _media_kind: MediaKind) {
        self.record(Observed::Incoming(call_id.clone()));
    }

    async fn on_outgoing_call(&self, call_id: &CallId, _media_kind: MediaKind) {
        self.record(Observed::Outgoing(call_id.clone()));
    }

    async fn on_call_state_changed(&self, _call_id: &CallId, phase: CallPhase) {
        self.record(Observed::Phase(phase));
    }

    async fn on_call_connected(&self, call_id: &CallId) {
        self.record(Observed::Connected(call_id.clone()));
    }

    async fn on_call_ended(&self, call_id: &CallId, reason: EndReason) {
        self.record(Observed::Ended(call_id.clone(), reason));
    }

    async fn on_remote_track(&self, _call_id: &CallId, participant: &ParticipantId, track: &MediaTrack) {
        self.record(Observed::Track(participant.clone(), track.kind));
    }

    async fn on_participant_media_changed(&self, participant: &ParticipantId, media: MediaFlags) {
        self.record(Observed::Media(participant.clone(), media));
    }
}

/// One client wired to the hub, driven by hand so tests decide when each
/// queued event is applied.
pub struct TestClient {
    pub participant: ParticipantId,
    pub engine: CallEngine,
    pub rx: EventReceiver,
    pub stream: SignalingStream,
    pub media: Arc<LoopbackMedia>,
    pub peers: Arc<LoopbackPeerFactory>,
    pub store: Arc<MemoryStore>,
    pub native: mpsc::UnboundedReceiver<NativeRequest>,
    pub listener: Arc<RecordingListener>,
}

impl TestClient {
    pub fn connect(hub: &SignalingHub, name: &str) -> Self {
        Self::build(hub, name, LoopbackPeerFactory::new(), Arc::new(MemoryStore::new()))
    }

    /// Links never connect on their own.
    pub fn connect_manual(hub: &SignalingHub, name: &str) -> Self {
        Self::build(hub, name, LoopbackPeerFactory::manual(), Arc::new(MemoryStore::new()))
    }

    pub fn with_store(hub: &SignalingHub, name: &str, store: Arc<MemoryStore>) -> Self {
        Self::build(hub, name, LoopbackPeerFactory::new(), store)
    }

    fn build(
        hub: &SignalingHub,
        name: &str,
        peers: LoopbackPeerFactory,
        store: Arc<MemoryStore>,
    ) -> Self {
        let participant = ParticipantId::from(name);
        let (transport, stream) = hub.connect(participant.clone());
        let media = Arc::new(LoopbackMedia::new());
        let peers = Arc::new(peers);
        let (telephony, native) = ChannelTelephony::new();
        let listener = Arc::new(RecordingListener::default());
        let parts = EngineParts {
            local_participant: participant.clone(),
            config: EngineConfig::default(),
            transport: Arc::new(transport),
            media: media.clone(),
            peers: peers.clone(),
            telephony: Arc::new(telephony),
            store: store.clone(),
        };
        let (engine, rx) = CallEngine::with_listener(parts, listener.clone());
        Self {
            participant,
            engine,
            rx,
            stream,
            media,
            peers,
            store,
            native,
            listener,
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.engine.phase()
    }

    /// Apply everything queued for this client. Returns how many events were
    /// handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Some(message) = self.stream.try_recv() {
                self.engine.handle_signal(message).await;
            } else if let Ok(event) = self.rx.try_recv() {
                self.engine.dispatch(event).await;
            } else {
                return handled;
            }
            handled += 1;
        }
    }

    pub fn native_requests(&mut self) -> Vec<NativeRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.native.try_recv() {
            requests.push(request);
        }
        requests
    }

    /// The id the call screen was given for the ringing call.
    pub fn displayed_uuid(&mut self) -> Option<Uuid> {
        self.native_requests().into_iter().find_map(|r| match r {
            NativeRequest::DisplayIncoming { call_uuid, .. } => Some(call_uuid),
            _ => None,
        })
    }
}

/// Pump both clients until neither has anything left.
pub async fn settle(a: &mut TestClient, b: &mut TestClient) {
    loop {
        let handled = a.pump().await + b.pump().await;
        if handled == 0 {
            break;
        }
    }
}

/// `caller` calls `callee` and `callee` is left ringing.
pub async fn ring(caller: &mut TestClient, callee: &mut TestClient, media_kind: MediaKind) -> CallId {
    let call_id = caller
        .engine
        .start_call(
            "conv-1".into(),
            vec![callee.participant.clone()],
            media_kind,
        )
        .await
        .unwrap();
    settle(caller, callee).await;
    assert_eq!(callee.phase(), CallPhase::RingingIncoming);
    call_id
}

/// A call between the two clients, connected on both sides.
pub async fn connected_call(
    caller: &mut TestClient,
    callee: &mut TestClient,
    media_kind: MediaKind,
) -> CallId {
    let call_id = ring(caller, callee, media_kind).await;
    callee.engine.accept_call(&call_id).await.unwrap();
    settle(caller, callee).await;
    assert_eq!(caller.phase(), CallPhase::Connected);
    assert_eq!(callee.phase(), CallPhase::Connected);
    call_id
}

pub fn pending_record(
    call_id: &CallId,
    caller: &str,
    age_ms: i64,
    status: PendingStatus,
) -> PendingCallRecord {
    PendingCallRecord {
        call_uuid: Uuid::now_v7(),
        call_id: call_id.clone(),
        caller_display_name: caller.to_uppercase(),
        caller_id: Some(caller.into()),
        media_kind: MediaKind::Audio,
        conversation_id: "conv-1".into(),
        created_at_epoch_ms: DateTime::now().epoch_millis() - age_ms,
        status,
    }
}
