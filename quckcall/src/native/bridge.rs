use std::collections::HashMap;
use std::sync::Arc;

use quckcall_signaling::{CallId, ConversationId, MediaKind};
use uuid::Uuid;

use super::{NativeAction, NativeTelephony};

/// A native action mapped back onto the call it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCommand {
    Answer(CallId),
    Reject(CallId),
}

/// Mirrors engine transitions onto the OS call screen.
///
/// The screen knows calls by a UUID of its own; the bridge owns the mapping
/// between those and signaling call ids. Platform failures are logged and
/// swallowed.
pub struct NativeTelephonyBridge {
    telephony: Arc<dyn NativeTelephony>,
    by_call: HashMap<CallId, Uuid>,
    by_uuid: HashMap<Uuid, CallId>,
}

impl NativeTelephonyBridge {
    pub fn new(telephony: Arc<dyn NativeTelephony>) -> Self {
        Self {
            telephony,
            by_call: HashMap::new(),
            by_uuid: HashMap::new(),
        }
    }

    pub fn call_uuid(&self, call_id: &CallId) -> Option<Uuid> {
        self.by_call.get(call_id).copied()
    }

    /// Register a call the background handler already put on screen.
    pub fn adopt(&mut self, call_uuid: Uuid, call_id: CallId) {
        tracing::debug!(%call_id, %call_uuid, "Adopting native call");
        self.register(call_uuid, call_id);
    }

    fn register(&mut self, call_uuid: Uuid, call_id: CallId) {
        if let Some(previous) = self.by_call.insert(call_id.clone(), call_uuid) {
            self.by_uuid.remove(&previous);
        }
        self.by_uuid.insert(call_uuid, call_id);
    }

    pub async fn display_incoming(
        &mut self,
        call_id: &CallId,
        caller_label: &str,
        media_kind: MediaKind,
        conversation_id: &ConversationId,
    ) -> Uuid {
        if let Some(call_uuid) = self.call_uuid(call_id) {
            return call_uuid;
        }
        let call_uuid = Uuid::now_v7();
        self.register(call_uuid, call_id.clone());
        if !self.telephony.is_available() {
            tracing::debug!(%call_id, "No native call screen, ringing in-app only");
            return call_uuid;
        }
        if let Err(err) = self
            .telephony
            .display_incoming(call_uuid, caller_label, media_kind.has_video(), conversation_id)
            .await
        {
            tracing::warn!(%call_id, %err, "Failed to display native incoming call");
        }
        call_uuid
    }

    pub async fn report_connected(&self, call_id: &CallId) {
        let Some(call_uuid) = self.call_uuid(call_id) else {
            return;
        };
        if !self.telephony.is_available() {
            return;
        }
        if let Err(err) = self.telephony.set_active(call_uuid).await {
            tracing::warn!(%call_id, %err, "Failed to mark native call active");
        }
    }

    /// Take the call off the OS screen and forget its mapping.
    pub async fn end_native(&mut self, call_id: &CallId) {
        let Some(call_uuid) = self.by_call.remove(call_id) else {
            return;
        };
        self.by_uuid.remove(&call_uuid);
        if !self.telephony.is_available() {
            return;
        }
        if let Err(err) = self.telephony.end(call_uuid).await {
            tracing::warn!(%call_id, %err, "Failed to end native call");
        }
    }

    /// `None` for UUIDs the bridge never showed or already ended.
    pub fn resolve(&self, action: NativeAction) -> Option<NativeCommand> {
        match action {
            NativeAction::Answer(call_uuid) => self
                .by_uuid
                .get(&call_uuid)
                .map(|call_id| NativeCommand::Answer(call_id.clone())),
            NativeAction::End(call_uuid) => self
                .by_uuid
                .get(&call_uuid)
                .map(|call_id| NativeCommand::Reject(call_id.clone())),
        }
    }
}
