use quckcall_signaling::{CallId, ConversationId, MediaKind, ParticipantId};
use tokio::sync::oneshot;

use crate::error::CallError;
use crate::models::CallSnapshot;
use crate::native::NativeAction;

use super::{EngineCommand, EngineEvent, EventSender};

/// Cloneable front-end of a running [`CallEngine`](super::CallEngine).
///
/// Every call is queued behind the events already waiting, so an answer from
/// the UI and one from the OS call screen are applied in arrival order.
#[derive(Clone)]
pub struct EngineHandle {
    events: EventSender,
}

impl EngineHandle {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        if !self.events.send(EngineEvent::Command(command(tx))) {
            return Err(CallError::EngineStopped);
        }
        rx.await.map_err(|_| CallError::EngineStopped)
    }

    pub async fn start_call(
        &self,
        conversation_id: ConversationId,
        participants: Vec<ParticipantId>,
        media_kind: MediaKind,
    ) -> Result<CallId, CallError> {
        self.request(|reply| EngineCommand::StartCall {
            conversation_id,
            participants,
            media_kind,
            reply,
        })
        .await?
    }

    pub async fn accept(&self, call_id: CallId) -> Result<(), CallError> {
        self.request(|reply| EngineCommand::Accept { call_id, reply })
            .await?
    }

    pub async fn reject(&self, call_id: CallId) -> Result<(), CallError> {
        self.request(|reply| EngineCommand::Reject { call_id, reply })
            .await?
    }

    pub async fn hang_up(&self, call_id: CallId) -> Result<(), CallError> {
        self.request(|reply| EngineCommand::HangUp { call_id, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<Option<CallSnapshot>, CallError> {
        self.request(|reply| EngineCommand::Snapshot { reply }).await
    }

    /// End any live call and stop the engine loop.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }

    /// Relay an OS call screen callback.
    pub fn native_action(&self, action: NativeAction) -> bool {
        self.events.native(action)
    }

    pub fn transport_connected(&self) -> bool {
        self.events.transport_connected()
    }
}
