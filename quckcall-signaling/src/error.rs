#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("signaling transport is not connected")]
    Unavailable,
    #[error("signaling transport closed")]
    Closed,
    #[error("server rejected {event}: {reason}")]
    Rejected { event: String, reason: String },
    #[error("unknown signaling event: {0}")]
    UnknownEvent(String),
    #[error("malformed signaling frame: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SignalingError {
    /// Whether the same operation may succeed once the connection comes back.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Closed)
    }
}
