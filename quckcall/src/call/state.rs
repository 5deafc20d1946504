use quckcall_signaling::CallId;

use crate::models::{CallPhase, CallSession, CallSnapshot};

/// Lifecycle of the single call the engine manages. A session exists exactly
/// in the non-idle states.
#[derive(Debug, Default)]
pub enum CallState {
    #[default]
    Idle,
    Dialing(CallSession),
    RingingIncoming(CallSession),
    Connecting(CallSession),
    Connected(CallSession),
}

impl CallState {
    pub fn phase(&self) -> CallPhase {
        match self {
            Self::Idle => CallPhase::Idle,
            Self::Dialing(_) => CallPhase::Dialing,
            Self::RingingIncoming(_) => CallPhase::RingingIncoming,
            Self::Connecting(_) => CallPhase::Connecting,
            Self::Connected(_) => CallPhase::Connected,
        }
    }

    pub fn session(&self) -> Option<&CallSession> {
        match self {
            Self::Idle => None,
            Self::Dialing(s) | Self::RingingIncoming(s) | Self::Connecting(s) | Self::Connected(s) => {
                Some(s)
            }
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut CallSession> {
        match self {
            Self::Idle => None,
            Self::Dialing(s) | Self::RingingIncoming(s) | Self::Connecting(s) | Self::Connected(s) => {
                Some(s)
            }
        }
    }

    pub fn into_session(self) -> Option<CallSession> {
        match self {
            Self::Idle => None,
            Self::Dialing(s) | Self::RingingIncoming(s) | Self::Connecting(s) | Self::Connected(s) => {
                Some(s)
            }
        }
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.session().map(|s| &s.call_id)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Replace the state with `Idle` and return the state it held before.
    pub fn take(&mut self) -> CallState {
        std::mem::take(self)
    }

    pub fn snapshot(&self) -> Option<CallSnapshot> {
        let session = self.session()?;
        Some(CallSnapshot {
            call_id: session.call_id.clone(),
            phase: self.phase(),
            direction: session.direction,
            media_kind: session.media_kind,
            conversation_id: session.conversation_id.clone(),
            participants: session.participants.iter().cloned().collect(),
            audio_active: session.audio_active,
        })
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Local user hung up.
    HangUp,
    /// Local user declined the ringing call.
    Declined,
    /// Ended or declined on the OS call screen.
    NativeEnded,
    RemoteEnded,
    RemoteRejected,
    /// Every participant link failed.
    ConnectionFailed,
    /// The server did not take our answer.
    AnswerFailed,
}

impl EndReason {
    /// Local endings are announced to the server; remote ones already were.
    pub fn is_local(self) -> bool {
        match self {
            Self::HangUp
            | Self::Declined
            | Self::NativeEnded
            | Self::ConnectionFailed
            | Self::AnswerFailed => true,
            Self::RemoteEnded | Self::RemoteRejected => false,
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::HangUp => "hung up",
            Self::Declined => "declined",
            Self::NativeEnded => "ended from call screen",
            Self::RemoteEnded => "remote ended",
            Self::RemoteRejected => "remote rejected",
            Self::ConnectionFailed => "connection failed",
            Self::AnswerFailed => "answer failed",
        };
        f.write_str(reason)
    }
}
