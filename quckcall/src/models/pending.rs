use quckcall_signaling::{CallId, ConversationId, MediaKind, ParticipantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Answered,
    Rejected,
}

/// Minimal snapshot of a ringing call, written outside the main process so
/// the call survives the app being killed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCallRecord {
    #[serde(rename = "callUUID")]
    pub call_uuid: Uuid,
    pub call_id: CallId,
    pub caller_display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<ParticipantId>,
    pub media_kind: MediaKind,
    pub conversation_id: ConversationId,
    pub created_at_epoch_ms: i64,
    pub status: PendingStatus,
}

impl PendingCallRecord {
    /// Milliseconds since the record was written. Clock skew never yields a
    /// negative age and a corrupt timestamp saturates instead of overflowing.
    pub fn age_ms(&self, now_epoch_ms: i64) -> i64 {
        now_epoch_ms.saturating_sub(self.created_at_epoch_ms).max(0)
    }
}
