//! In-process media and peer connection capabilities.
//!
//! They negotiate nothing real: offers are synthetic descriptions, a link
//! "connects" once both descriptions are set, and every call is recorded so a
//! host can inspect what the manager did.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use quckcall_signaling::{IceCandidate, MediaKind, ParticipantId};

use crate::error::{MediaError, PeerError};

use super::{
    Description, MediaDevices, MediaTrack, PeerConfig, PeerConnection, PeerConnectionFactory,
    PeerEvents, PeerState, SdpType, TrackKind, sdp,
};

#[derive(Default)]
struct MediaCounters {
    acquired: usize,
    released: usize,
}

/// Fake camera and microphone.
#[derive(Default)]
pub struct LoopbackMedia {
    next_failure: Mutex<Option<MediaError>>,
    counters: Mutex<MediaCounters>,
    track_counter: AtomicU32,
}

impl LoopbackMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next acquisition fail with `error`.
    pub fn fail_next(&self, error: MediaError) {
        *self.next_failure.lock() = Some(error);
    }

    /// Tracks handed out and not released yet.
    pub fn live_tracks(&self) -> usize {
        let counters = self.counters.lock();
        counters.acquired - counters.released
    }

    pub fn released_tracks(&self) -> usize {
        self.counters.lock().released
    }
}

#[async_trait]
impl MediaDevices for LoopbackMedia {
    async fn acquire(&self, kind: MediaKind) -> Result<Vec<MediaTrack>, MediaError> {
        if let Some(error) = self.next_failure.lock().take() {
            return Err(error);
        }
        let n = self.track_counter.fetch_add(1, Ordering::SeqCst);
        let mut tracks = vec![MediaTrack {
            id: format!("mic-{n}"),
            kind: TrackKind::Audio,
        }];
        if kind.has_video() {
            tracks.push(MediaTrack {
                id: format!("cam-{n}"),
                kind: TrackKind::Video,
            });
        }
        self.counters.lock().acquired += tracks.len();
        Ok(tracks)
    }

    fn release(&self, tracks: &[MediaTrack]) {
        self.counters.lock().released += tracks.len();
    }
}

/// Everything the loopback connections were asked to do.
#[derive(Debug, Default, Clone)]
pub struct LoopbackLog {
    pub created: Vec<ParticipantId>,
    pub closed: Vec<ParticipantId>,
    pub local_descriptions: Vec<(ParticipantId, Description)>,
    pub remote_descriptions: Vec<(ParticipantId, Description)>,
    pub remote_candidates: Vec<(ParticipantId, IceCandidate)>,
}

impl LoopbackLog {
    pub fn remote_offers_for(&self, participant: &ParticipantId) -> Vec<String> {
        self.remote_descriptions
            .iter()
            .filter(|(p, d)| p == participant && d.kind == SdpType::Offer)
            .map(|(_, d)| d.sdp.clone())
            .collect()
    }

    pub fn close_count(&self, participant: &ParticipantId) -> usize {
        self.closed.iter().filter(|p| *p == participant).count()
    }
}

pub struct LoopbackPeerFactory {
    log: Arc<Mutex<LoopbackLog>>,
    auto_connect: bool,
}

impl LoopbackPeerFactory {
    /// Links report `Connected` as soon as both descriptions are applied.
    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            auto_connect: true,
        }
    }

    /// Links never report state on their own; the host drives them.
    pub fn manual() -> Self {
        Self {
            log: Arc::default(),
            auto_connect: false,
        }
    }

    pub fn log(&self) -> LoopbackLog {
        self.log.lock().clone()
    }
}

impl Default for LoopbackPeerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerConnectionFactory for LoopbackPeerFactory {
    fn create(
        &self,
        config: &PeerConfig,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerConnection>, PeerError> {
        let participant = events.participant().clone();
        tracing::trace!(%participant, ice_servers = config.ice_servers.len(), "Creating loopback peer");
        self.log.lock().created.push(participant.clone());
        Ok(Box::new(LoopbackPeer {
            participant,
            log: self.log.clone(),
            events,
            auto_connect: self.auto_connect,
            tracks: Mutex::new(Vec::new()),
            local_set: AtomicBool::new(false),
            remote_set: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

struct LoopbackPeer {
    participant: ParticipantId,
    log: Arc<Mutex<LoopbackLog>>,
    events: PeerEvents,
    auto_connect: bool,
    tracks: Mutex<Vec<MediaTrack>>,
    local_set: AtomicBool,
    remote_set: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackPeer {
    fn ensure_open(&self) -> Result<(), PeerError> {
        match self.closed.load(Ordering::SeqCst) {
            true => Err(PeerError::Closed),
            false => Ok(()),
        }
    }

    fn describe(&self, kind: SdpType) -> String {
        let has_video = self
            .tracks
            .lock()
            .iter()
            .any(|t| t.kind == TrackKind::Video);
        let session = match kind {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        };
        let mut sdp = format!(
            "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=loopback-{session}\r\nt=0 0\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\n\
             a=rtpmap:111 opus/48000/2\r\na=fmtp:111 minptime=10\r\n"
        );
        if has_video {
            sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\n");
        }
        sdp
    }

    fn maybe_connect(&self) {
        if !self.auto_connect
            || !self.local_set.load(Ordering::SeqCst)
            || !self.remote_set.load(Ordering::SeqCst)
        {
            return;
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.events.state(PeerState::Connecting);
            self.events.state(PeerState::Connected);
        }
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.tracks.lock().push(track.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PeerError> {
        self.ensure_open()?;
        Ok(self.describe(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        self.ensure_open()?;
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(PeerError::Platform(
                "cannot answer without a remote offer".to_owned(),
            ));
        }
        Ok(self.describe(SdpType::Answer))
    }

    async fn set_local_description(&self, description: Description) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.log
            .lock()
            .local_descriptions
            .push((self.participant.clone(), description));
        if !self.local_set.swap(true, Ordering::SeqCst) {
            self.events.ice_candidate(IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 127.0.0.1 40000 typ host".to_owned(),
                sdp_mid: Some("0".to_owned()),
                sdp_m_line_index: Some(0),
            });
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, description: Description) -> Result<(), PeerError> {
        self.ensure_open()?;
        sdp::validate(&description.sdp)?;
        let remote_video = description.sdp.contains("m=video");
        self.log
            .lock()
            .remote_descriptions
            .push((self.participant.clone(), description));
        if !self.remote_set.swap(true, Ordering::SeqCst) {
            self.events.track(MediaTrack {
                id: format!("{}-audio", self.participant),
                kind: TrackKind::Audio,
            });
            if remote_video {
                self.events.track(MediaTrack {
                    id: format!("{}-video", self.participant),
                    kind: TrackKind::Video,
                });
            }
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.log
            .lock()
            .remote_candidates
            .push((self.participant.clone(), candidate));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.log.lock().closed.push(self.participant.clone());
    }
}
