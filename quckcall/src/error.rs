use quckcall_signaling::{ParticipantId, SignalingError};

/// Camera or microphone could not be obtained.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("permission to use {0} was denied")]
    PermissionDenied(&'static str),
    #[error("{0} is in use by another application")]
    DeviceBusy(&'static str),
    #[error("media capture failed: {0}")]
    Other(String),
}

/// Failure of the platform peer connection for a single participant.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerError {
    #[error("malformed session description: {0}")]
    MalformedDescription(String),
    #[error("no link for participant")]
    UnknownParticipant,
    #[error("peer connection is closed")]
    Closed,
    #[error("peer connection failed: {0}")]
    Platform(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("signaling failed: {0}")]
    Transport(#[from] SignalingError),
    #[error("local media unavailable: {0}")]
    Media(#[from] MediaError),
    #[error("negotiation with {participant} failed: {source}")]
    Peer {
        participant: ParticipantId,
        #[source]
        source: PeerError,
    },
    #[error("another call is already in progress")]
    Busy,
    #[error("no participant left to call")]
    NoParticipants,
    #[error("call engine has stopped")]
    EngineStopped,
}

impl CallError {
    /// Only transport failures are worth retrying from the caller's side; the
    /// engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::Media(_)
            | Self::Peer { .. }
            | Self::Busy
            | Self::NoParticipants
            | Self::EngineStopped => false,
        }
    }
}

/// The OS call screen could not be driven. Never fatal to a call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NativeError {
    #[error("native telephony is not available on this platform")]
    Unavailable,
    #[error("platform host is gone")]
    HostGone,
}
