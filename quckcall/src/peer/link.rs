use quckcall_signaling::{IceCandidate, ParticipantId};

use crate::error::PeerError;
use crate::models::MediaFlags;

use super::{PeerConnection, PeerState};

/// Negotiation state with one remote participant.
///
/// Owns the platform connection; it is closed exactly once, either through
/// [`ParticipantLink::close`] or when the link is dropped on an error path.
pub struct ParticipantLink {
    participant: ParticipantId,
    connection: Option<Box<dyn PeerConnection>>,
    pending_local_candidates: Vec<IceCandidate>,
    pending_remote_candidates: Vec<IceCandidate>,
    has_remote_description: bool,
    media: MediaFlags,
    state: PeerState,
}

impl ParticipantLink {
    pub(super) fn new(participant: ParticipantId, connection: Box<dyn PeerConnection>) -> Self {
        Self {
            participant,
            connection: Some(connection),
            pending_local_candidates: Vec::new(),
            pending_remote_candidates: Vec::new(),
            has_remote_description: false,
            media: MediaFlags::default(),
            state: PeerState::New,
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn media(&self) -> MediaFlags {
        self.media
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    pub fn queued_local_candidates(&self) -> usize {
        self.pending_local_candidates.len()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    pub(super) fn connection(&self) -> Result<&dyn PeerConnection, PeerError> {
        self.connection.as_deref().ok_or(PeerError::Closed)
    }

    pub(super) fn set_state(&mut self, state: PeerState) {
        self.state = state;
    }

    pub(super) fn set_media(&mut self, media: MediaFlags) {
        self.media = media;
    }

    pub(super) fn mark_remote_description(&mut self) -> Vec<IceCandidate> {
        self.has_remote_description = true;
        std::mem::take(&mut self.pending_remote_candidates)
    }

    pub(super) fn queue_remote_candidate(&mut self, candidate: IceCandidate) {
        self.pending_remote_candidates.push(candidate);
    }

    pub(super) fn queue_local_candidate(&mut self, candidate: IceCandidate) {
        self.pending_local_candidates.push(candidate);
    }

    pub(super) fn take_local_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending_local_candidates)
    }

    /// Returns `false` when the link was already closed.
    pub fn close(&mut self) -> bool {
        match self.connection.take() {
            Some(connection) => {
                connection.close();
                self.state = PeerState::Closed;
                self.pending_local_candidates.clear();
                self.pending_remote_candidates.clear();
                tracing::debug!(participant = %self.participant, "Peer connection closed");
                true
            }
            None => false,
        }
    }
}

impl Drop for ParticipantLink {
    fn drop(&mut self) {
        self.close();
    }
}
