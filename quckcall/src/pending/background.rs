use std::sync::Arc;

use quckcall_signaling::IncomingCall;
use uuid::Uuid;

use crate::models::{DateTime, PendingCallRecord, PendingStatus};
use crate::native::{NativeAction, NativeTelephony};

use super::PendingCallStore;

/// Entry point for the platform's background context, which runs while the
/// app process may be dead.
///
/// On push delivery it records the call and puts it on the OS call screen; a
/// later answer or decline on that screen only updates the record. The app
/// picks the record up on its next start.
pub struct BackgroundCallHandler {
    store: PendingCallStore,
    telephony: Arc<dyn NativeTelephony>,
}

impl BackgroundCallHandler {
    pub fn new(store: PendingCallStore, telephony: Arc<dyn NativeTelephony>) -> Self {
        Self { store, telephony }
    }

    pub async fn on_push(&self, incoming: &IncomingCall) -> Result<PendingCallRecord, anyhow::Error> {
        let record = PendingCallRecord {
            call_uuid: Uuid::now_v7(),
            call_id: incoming.call_id.clone(),
            caller_display_name: incoming
                .caller_name
                .clone()
                .unwrap_or_else(|| incoming.from_participant.to_string()),
            caller_id: Some(incoming.from_participant.clone()),
            media_kind: incoming.media_kind,
            conversation_id: incoming.conversation_id.clone(),
            created_at_epoch_ms: DateTime::now().epoch_millis(),
            status: PendingStatus::Pending,
        };
        self.store.write_pending(&record).await?;
        tracing::info!(call_id = %record.call_id, call_uuid = %record.call_uuid, "Pending call recorded");

        if let Err(err) = self
            .telephony
            .display_incoming(
                record.call_uuid,
                &record.caller_display_name,
                record.media_kind.has_video(),
                &record.conversation_id,
            )
            .await
        {
            tracing::warn!(call_id = %record.call_id, %err, "Failed to display native incoming call");
        }
        Ok(record)
    }

    /// Returns the new status, or `None` when the action is not about the
    /// recorded call.
    pub async fn on_native_action(
        &self,
        action: NativeAction,
    ) -> Result<Option<PendingStatus>, anyhow::Error> {
        let (call_uuid, status) = match action {
            NativeAction::Answer(call_uuid) => (call_uuid, PendingStatus::Answered),
            NativeAction::End(call_uuid) => (call_uuid, PendingStatus::Rejected),
        };
        let Some(record) = self.store.read_pending().await? else {
            tracing::debug!(%call_uuid, "Native action without pending call");
            return Ok(None);
        };
        if record.call_uuid != call_uuid {
            tracing::debug!(%call_uuid, "Native action for another call");
            return Ok(None);
        }
        self.store.update_status(&record.call_id, status).await?;
        tracing::info!(call_id = %record.call_id, ?status, "Pending call updated");
        Ok(Some(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{ChannelTelephony, NativeRequest};
    use crate::storage::MemoryStore;
    use quckcall_signaling::MediaKind;

    fn incoming() -> IncomingCall {
        IncomingCall {
            call_id: "call-1".into(),
            from_participant: "bob".into(),
            media_kind: MediaKind::Video,
            conversation_id: "conv-1".into(),
            caller_name: None,
        }
    }

    #[tokio::test]
    async fn test_push_then_answer() {
        let store = PendingCallStore::new(Arc::new(MemoryStore::default()));
        let (telephony, mut requests) = ChannelTelephony::new();
        let handler = BackgroundCallHandler::new(store.clone(), Arc::new(telephony));

        let record = handler.on_push(&incoming()).await.unwrap();
        assert_eq!(record.caller_display_name, "bob");
        assert_eq!(record.status, PendingStatus::Pending);
        assert!(matches!(
            requests.try_recv().unwrap(),
            NativeRequest::DisplayIncoming { has_video: true, .. }
        ));

        let other = handler
            .on_native_action(NativeAction::Answer(Uuid::now_v7()))
            .await
            .unwrap();
        assert_eq!(other, None);

        let status = handler
            .on_native_action(NativeAction::Answer(record.call_uuid))
            .await
            .unwrap();
        assert_eq!(status, Some(PendingStatus::Answered));
        let stored = store.read_pending().await.unwrap().unwrap();
        assert_eq!(stored.status, PendingStatus::Answered);
        assert_eq!(stored.call_uuid, record.call_uuid);
    }

    #[tokio::test]
    async fn test_decline_marks_rejected() {
        let store = PendingCallStore::new(Arc::new(MemoryStore::default()));
        let (telephony, _requests) = ChannelTelephony::new();
        let handler = BackgroundCallHandler::new(store.clone(), Arc::new(telephony));

        let record = handler.on_push(&incoming()).await.unwrap();
        handler
            .on_native_action(NativeAction::End(record.call_uuid))
            .await
            .unwrap();
        assert_eq!(
            store.read_pending().await.unwrap().map(|r| r.status),
            Some(PendingStatus::Rejected)
        );
    }
}
