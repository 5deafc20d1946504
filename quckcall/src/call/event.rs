use quckcall_signaling::{CallId, ConversationId, MediaKind, ParticipantId, SignalingMessage, SignalingStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::CallError;
use crate::models::CallSnapshot;
use crate::native::NativeAction;
use crate::peer::LinkEvent;

/// Everything the engine reacts to. Transport messages, peer connection
/// reports, OS call screen actions and local commands share one queue so
/// they are applied strictly one after another.
pub enum EngineEvent {
    Signal(SignalingMessage),
    Link(LinkEvent),
    Native(NativeAction),
    /// The signaling socket is back after an outage.
    TransportConnected,
    Command(EngineCommand),
}

pub enum EngineCommand {
    StartCall {
        conversation_id: ConversationId,
        participants: Vec<ParticipantId>,
        media_kind: MediaKind,
        reply: oneshot::Sender<Result<CallId, CallError>>,
    },
    Accept {
        call_id: CallId,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    Reject {
        call_id: CallId,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    HangUp {
        call_id: CallId,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Option<CallSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Producer side of the engine queue.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    /// Returns `false` once the engine has stopped.
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn signal(&self, message: SignalingMessage) -> bool {
        self.send(EngineEvent::Signal(message))
    }

    pub fn native(&self, action: NativeAction) -> bool {
        self.send(EngineEvent::Native(action))
    }

    pub fn transport_connected(&self) -> bool {
        self.send(EngineEvent::TransportConnected)
    }

    /// Pump a signaling stream into the queue until either side closes.
    pub fn forward_signaling(&self, mut stream: SignalingStream) -> JoinHandle<()> {
        let events = self.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.recv().await {
                if !events.signal(message) {
                    break;
                }
            }
            tracing::debug!("Signaling stream forwarding stopped");
        })
    }
}
