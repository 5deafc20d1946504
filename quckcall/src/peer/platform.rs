use std::sync::Arc;

use async_trait::async_trait;
use quckcall_signaling::{CallId, IceCandidate, IceServer, MediaKind, ParticipantId};

use crate::call::{EngineEvent, EventSender};
use crate::error::{MediaError, PeerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub kind: SdpType,
    pub sdp: String,
}

impl Description {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Transport state reported by the platform peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
}

/// Camera and microphone capture.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, kind: MediaKind) -> Result<Vec<MediaTrack>, MediaError>;

    fn release(&self, tracks: &[MediaTrack]);
}

/// Local capture for one call. Tracks are released exactly once, on
/// [`LocalMedia::stop`] or on drop.
pub struct LocalMedia {
    devices: Arc<dyn MediaDevices>,
    tracks: Vec<MediaTrack>,
    stopped: bool,
}

impl LocalMedia {
    pub async fn acquire(
        devices: Arc<dyn MediaDevices>,
        kind: MediaKind,
    ) -> Result<Self, MediaError> {
        let tracks = devices.acquire(kind).await?;
        tracing::debug!(%kind, tracks = tracks.len(), "Local media acquired");
        Ok(Self {
            devices,
            tracks,
            stopped: false,
        })
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.devices.release(&self.tracks);
            tracing::debug!(tracks = self.tracks.len(), "Local media stopped");
        }
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.release();
    }
}

/// One platform peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError>;

    async fn create_offer(&self) -> Result<String, PeerError>;

    async fn create_answer(&self) -> Result<String, PeerError>;

    async fn set_local_description(&self, description: Description) -> Result<(), PeerError>;

    async fn set_remote_description(&self, description: Description) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    fn close(&self);
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create(
        &self,
        config: &PeerConfig,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerConnection>, PeerError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEventKind {
    IceCandidate(IceCandidate),
    Track(MediaTrack),
    State(PeerState),
}

/// Something a participant's peer connection reported.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    pub call_id: CallId,
    pub participant: ParticipantId,
    pub kind: LinkEventKind,
}

/// Sink handed to a platform peer connection. Everything it reports lands on
/// the engine queue tagged with the call and participant it belongs to.
#[derive(Clone)]
pub struct PeerEvents {
    call_id: CallId,
    participant: ParticipantId,
    tx: EventSender,
}

impl PeerEvents {
    pub fn new(call_id: CallId, participant: ParticipantId, tx: EventSender) -> Self {
        Self {
            call_id,
            participant,
            tx,
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn ice_candidate(&self, candidate: IceCandidate) {
        self.emit(LinkEventKind::IceCandidate(candidate));
    }

    pub fn track(&self, track: MediaTrack) {
        self.emit(LinkEventKind::Track(track));
    }

    pub fn state(&self, state: PeerState) {
        self.emit(LinkEventKind::State(state));
    }

    fn emit(&self, kind: LinkEventKind) {
        let event = LinkEvent {
            call_id: self.call_id.clone(),
            participant: self.participant.clone(),
            kind,
        };
        if !self.tx.send(EngineEvent::Link(event)) {
            tracing::debug!(participant = %self.participant, "Engine gone, dropping link event");
        }
    }
}
