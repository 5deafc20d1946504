use std::collections::BTreeSet;

use quckcall_signaling::{CallId, ConversationId, MediaKind, ParticipantId};
use serde::{Deserialize, Serialize};

use super::DateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Observable lifecycle phase of the current call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallPhase {
    Idle,
    Dialing,
    RingingIncoming,
    Connecting,
    Connected,
    Ended,
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Dialing => "dialing",
            Self::RingingIncoming => "ringing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Aggregate root for one call. Owned by the engine's state; dropped when
/// the call ends.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub media_kind: MediaKind,
    pub conversation_id: ConversationId,
    pub participants: BTreeSet<ParticipantId>,
    pub caller_name: Option<String>,
    pub created_at: DateTime,
    pub audio_active: bool,
}

impl CallSession {
    pub fn outgoing(
        call_id: CallId,
        media_kind: MediaKind,
        conversation_id: ConversationId,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> Self {
        Self {
            call_id,
            direction: CallDirection::Outgoing,
            media_kind,
            conversation_id,
            participants: participants.into_iter().collect(),
            caller_name: None,
            created_at: DateTime::now(),
            audio_active: false,
        }
    }

    pub fn incoming(
        call_id: CallId,
        media_kind: MediaKind,
        conversation_id: ConversationId,
        caller: Option<ParticipantId>,
        caller_name: Option<String>,
    ) -> Self {
        Self {
            call_id,
            direction: CallDirection::Incoming,
            media_kind,
            conversation_id,
            participants: caller.into_iter().collect(),
            caller_name,
            created_at: DateTime::now(),
            audio_active: false,
        }
    }

    /// Label for the native call screen.
    pub fn caller_label(&self) -> String {
        if let Some(name) = &self.caller_name {
            return name.clone();
        }
        match self.participants.iter().next() {
            Some(participant) => participant.to_string(),
            None => "Unknown caller".to_owned(),
        }
    }
}

/// Read-only view of the engine's current call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub phase: CallPhase,
    pub direction: CallDirection,
    pub media_kind: MediaKind,
    pub conversation_id: ConversationId,
    pub participants: Vec<ParticipantId>,
    pub audio_active: bool,
}
