use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use quckcall::call::{CallEngine, CallListener, EndReason, EngineHandle, EngineParts};
use quckcall::config::{ConfigManager, EngineConfig};
use quckcall::models::{CallPhase, MediaFlags};
use quckcall::native::{ChannelTelephony, NativeAction, NativeRequest, select_telephony};
use quckcall::peer::MediaTrack;
use quckcall::peer::loopback::{LoopbackMedia, LoopbackPeerFactory};
use quckcall::storage::{KvStore, MemoryStore, SqliteStore};
use quckcall_signaling::{CallId, ConversationId, MediaKind, ParticipantId, SignalingHub};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing_subscriber::prelude::*;

/// Logs what a client's UI would show.
struct LogListener {
    name: &'static str,
}

#[async_trait]
impl CallListener for LogListener {
    async fn on_incoming_call(&self, call_id: &CallId, caller_label: &str, media_kind: MediaKind) {
        tracing::info!("[{}] {} call {} from {}", self.name, media_kind, call_id, caller_label);
    }

    async fn on_outgoing_call(&self, call_id: &CallId, media_kind: MediaKind) {
        tracing::info!("[{}] calling, {} call {}", self.name, media_kind, call_id);
    }

    async fn on_call_state_changed(&self, call_id: &CallId, phase: CallPhase) {
        tracing::info!("[{}] call {} is {}", self.name, call_id, phase);
    }

    async fn on_call_connected(&self, _call_id: &CallId) {}

    async fn on_call_ended(&self, call_id: &CallId, reason: EndReason) {
        tracing::info!("[{}] call {} ended: {}", self.name, call_id, reason);
    }

    async fn on_remote_track(&self, _call_id: &CallId, participant: &ParticipantId, track: &MediaTrack) {
        tracing::info!("[{}] rendering {:?} track {} of {}", self.name, track.kind, track.id, participant);
    }

    async fn on_participant_media_changed(&self, participant: &ParticipantId, media: MediaFlags) {
        tracing::info!("[{}] {} media: {:?}", self.name, participant, media);
    }
}

struct Client {
    handle: EngineHandle,
    task: JoinHandle<()>,
    native_requests: mpsc::UnboundedReceiver<NativeRequest>,
}

async fn open_store(data_dir: Option<&PathBuf>, name: &str) -> Result<Arc<dyn KvStore>, anyhow::Error> {
    let Some(dir) = data_dir else {
        return Ok(Arc::new(MemoryStore::new()));
    };
    let passphrase =
        std::env::var("QUCKCALL_PASSPHRASE").unwrap_or_else(|_| "loopback-demo".to_owned());
    let store = SqliteStore::open(&dir.join(name), &passphrase).await?;
    Ok(Arc::new(store))
}

async fn start_client(
    hub: &SignalingHub,
    name: &'static str,
    config: &EngineConfig,
    store: Arc<dyn KvStore>,
) -> Client {
    let participant = ParticipantId::from(name);
    let (transport, stream) = hub.connect(participant.clone());
    let (host, native_requests) = ChannelTelephony::new();
    let parts = EngineParts {
        local_participant: participant,
        config: config.clone(),
        transport: Arc::new(transport),
        media: Arc::new(LoopbackMedia::new()),
        peers: Arc::new(LoopbackPeerFactory::new()),
        telephony: select_telephony(config, Some(host)),
        store,
    };
    let (mut engine, rx) = CallEngine::with_listener(parts, Arc::new(LogListener { name }));
    if let Some(call_id) = engine.recover_pending().await {
        tracing::info!("[{}] recovered call {}", name, call_id);
    }
    engine.events().forward_signaling(stream);
    let (handle, task) = engine.spawn(rx);
    Client {
        handle,
        task,
        native_requests,
    }
}

async fn wait_for_phase(client: &Client, phase: CallPhase) -> Result<(), anyhow::Error> {
    for _ in 0..100 {
        let current = client
            .handle
            .snapshot()
            .await?
            .map_or(CallPhase::Idle, |s| s.phase);
        if current == phase {
            return Ok(());
        }
        sleep(Duration::from_millis(20)).await;
    }
    Err(anyhow!("Timed out waiting for {}", phase))
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing (optional, controlled via RUST_LOG)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quckcall=info,quckcall_signaling=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut media_kind = MediaKind::Audio;
    let mut data_dir = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--video" => media_kind = MediaKind::Video,
            "--data-dir" => {
                data_dir = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("--data-dir needs a path"))?,
                ))
            }
            other => bail!("Unknown argument: {}", other),
        }
    }
    if data_dir.is_none() {
        data_dir = dirs::data_local_dir()
            .map(|d| d.join("quckcall"))
            .filter(|_| std::env::var_os("QUCKCALL_PERSIST").is_some());
    }

    let alice_store = open_store(data_dir.as_ref(), "alice").await?;
    let bob_store = open_store(data_dir.as_ref(), "bob").await?;
    let config = ConfigManager::new(alice_store.clone()).load().await?;
    let hub = SignalingHub::new(config.default_ice_servers.clone());

    let alice = start_client(&hub, "alice", &config, alice_store).await;
    let mut bob = start_client(&hub, "bob", &config, bob_store).await;

    let call_id = alice
        .handle
        .start_call(
            ConversationId::from("loopback"),
            vec![ParticipantId::from("bob")],
            media_kind,
        )
        .await?;

    // Bob picks up on the OS call screen.
    let request = timeout(Duration::from_secs(2), bob.native_requests.recv())
        .await?
        .ok_or_else(|| anyhow!("Bob's call screen never rang"))?;
    let NativeRequest::DisplayIncoming { call_uuid, .. } = request else {
        bail!("Unexpected call screen request: {:?}", request);
    };
    bob.handle.native_action(NativeAction::Answer(call_uuid));

    wait_for_phase(&alice, CallPhase::Connected).await?;
    wait_for_phase(&bob, CallPhase::Connected).await?;
    if let Some(snapshot) = alice.handle.snapshot().await? {
        tracing::info!("Alice: {}", serde_json::to_string(&snapshot)?);
    }

    sleep(Duration::from_millis(200)).await;
    alice.handle.hang_up(call_id).await?;
    wait_for_phase(&bob, CallPhase::Idle).await?;

    alice.handle.shutdown().await?;
    bob.handle.shutdown().await?;
    let _ = alice.task.await;
    let _ = bob.task.await;
    Ok(())
}
