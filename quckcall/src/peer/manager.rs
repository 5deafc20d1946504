use std::collections::{HashMap, hash_map};
use std::sync::Arc;

use quckcall_signaling::{
    CallId, IceCandidate, IceCandidateMessage, IceServer, ParticipantId, SignalingError,
    SignalingMessage, SignalingTransport,
};

use crate::call::EventSender;
use crate::error::PeerError;
use crate::models::MediaFlags;

use super::{
    Description, MediaTrack, ParticipantLink, PeerConfig, PeerConnectionFactory, PeerEvents,
    PeerState, QualityPolicy, SdpType, sdp,
};

/// Negotiation context of the call the manager currently serves.
struct ActiveNegotiation {
    call_id: CallId,
    config: PeerConfig,
    local_tracks: Vec<MediaTrack>,
}

/// Owns every [`ParticipantLink`] of the current call.
pub struct PeerConnectionManager {
    factory: Arc<dyn PeerConnectionFactory>,
    transport: Arc<dyn SignalingTransport>,
    events: EventSender,
    quality: QualityPolicy,
    active: Option<ActiveNegotiation>,
    links: HashMap<ParticipantId, ParticipantLink>,
}

impl PeerConnectionManager {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        transport: Arc<dyn SignalingTransport>,
        events: EventSender,
        quality: QualityPolicy,
    ) -> Self {
        Self {
            factory,
            transport,
            events,
            quality,
            active: None,
            links: HashMap::new(),
        }
    }

    /// Prepare for negotiating `call_id`. Links of a previous call must have
    /// been closed already.
    pub fn begin(&mut self, call_id: CallId, ice_servers: Vec<IceServer>, local_tracks: Vec<MediaTrack>) {
        if !self.links.is_empty() {
            tracing::warn!(stale = self.links.len(), "Closing links left from previous call");
            self.close_all();
        }
        tracing::debug!(%call_id, ice_servers = ice_servers.len(), "Peer negotiation context ready");
        self.active = Some(ActiveNegotiation {
            call_id,
            config: PeerConfig { ice_servers },
            local_tracks,
        });
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.active.as_ref().map(|a| &a.call_id)
    }

    pub fn link(&self, participant: &ParticipantId) -> Option<&ParticipantLink> {
        self.links.get(participant)
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.links.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Create the link for `participant`, or return the existing one.
    pub async fn create_link(
        &mut self,
        participant: &ParticipantId,
    ) -> Result<&mut ParticipantLink, PeerError> {
        let active = self.active.as_ref().ok_or(PeerError::Closed)?;
        match self.links.entry(participant.clone()) {
            hash_map::Entry::Occupied(entry) => Ok(entry.into_mut()),
            hash_map::Entry::Vacant(entry) => {
                let events = PeerEvents::new(
                    active.call_id.clone(),
                    participant.clone(),
                    self.events.clone(),
                );
                let connection = self.factory.create(&active.config, events)?;
                // Dropping the link on a failed track closes the connection.
                let link = ParticipantLink::new(participant.clone(), connection);
                for track in &active.local_tracks {
                    link.connection()?.add_track(track).await?;
                }
                tracing::debug!(call_id = %active.call_id, %participant, "Participant link created");
                Ok(entry.insert(link))
            }
        }
    }

    /// Apply a remote offer or answer. A malformed description closes only
    /// this participant's link.
    pub async fn apply_remote_description(
        &mut self,
        participant: &ParticipantId,
        description: Description,
    ) -> Result<(), PeerError> {
        let result = self.try_apply_remote_description(participant, description).await;
        if let Err(err) = &result {
            tracing::warn!(%participant, %err, "Remote description rejected, closing link");
            self.close_link(participant);
        }
        result
    }

    async fn try_apply_remote_description(
        &mut self,
        participant: &ParticipantId,
        description: Description,
    ) -> Result<(), PeerError> {
        sdp::validate(&description.sdp)?;
        let link = self
            .links
            .get_mut(participant)
            .ok_or(PeerError::UnknownParticipant)?;
        link.connection()?.set_remote_description(description).await?;
        let queued = link.mark_remote_description();
        for candidate in queued {
            if let Err(err) = link.connection()?.add_ice_candidate(candidate).await {
                tracing::warn!(%participant, %err, "Failed to apply queued remote candidate");
            }
        }
        Ok(())
    }

    pub async fn create_local_offer(&mut self, participant: &ParticipantId) -> Result<String, PeerError> {
        self.create_local_description(participant, SdpType::Offer).await
    }

    pub async fn create_local_answer(&mut self, participant: &ParticipantId) -> Result<String, PeerError> {
        self.create_local_description(participant, SdpType::Answer).await
    }

    async fn create_local_description(
        &mut self,
        participant: &ParticipantId,
        kind: SdpType,
    ) -> Result<String, PeerError> {
        let link = self
            .links
            .get(participant)
            .ok_or(PeerError::UnknownParticipant)?;
        let connection = link.connection()?;
        let raw = match kind {
            SdpType::Offer => connection.create_offer().await?,
            SdpType::Answer => connection.create_answer().await?,
        };
        let sdp = self.quality.apply(&raw);
        connection
            .set_local_description(Description {
                kind,
                sdp: sdp.clone(),
            })
            .await?;
        Ok(sdp)
    }

    /// Remote candidates that arrive before the remote description are held
    /// on the link and applied right after it.
    pub async fn add_remote_ice_candidate(
        &mut self,
        participant: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<(), PeerError> {
        let link = self
            .links
            .get_mut(participant)
            .ok_or(PeerError::UnknownParticipant)?;
        if !link.has_remote_description() {
            link.queue_remote_candidate(candidate);
            return Ok(());
        }
        link.connection()?.add_ice_candidate(candidate).await
    }

    /// Send a locally gathered candidate to `participant`, or keep it on the
    /// link while the transport is down.
    pub async fn forward_local_candidate(
        &mut self,
        participant: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError> {
        let Some(call_id) = self.call_id().cloned() else {
            return Ok(());
        };
        let Some(link) = self.links.get_mut(participant) else {
            tracing::debug!(%participant, "Dropping candidate for closed link");
            return Ok(());
        };
        if !self.transport.is_connected() {
            link.queue_local_candidate(candidate);
            return Ok(());
        }
        let message = SignalingMessage::IceCandidate(IceCandidateMessage {
            call_id,
            target_participant: participant.clone(),
            from_participant: None,
            candidate: candidate.clone(),
        });
        match self.transport.emit(message).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => {
                link.queue_local_candidate(candidate);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Send every candidate queued while the transport was unavailable.
    pub async fn flush_local_candidates(&mut self) -> Result<usize, SignalingError> {
        let Some(call_id) = self.call_id().cloned() else {
            return Ok(0);
        };
        let mut sent = 0;
        for (participant, link) in self.links.iter_mut() {
            let queued = link.take_local_candidates();
            let mut queued = queued.into_iter();
            while let Some(candidate) = queued.next() {
                let message = SignalingMessage::IceCandidate(IceCandidateMessage {
                    call_id: call_id.clone(),
                    target_participant: participant.clone(),
                    from_participant: None,
                    candidate: candidate.clone(),
                });
                if let Err(err) = self.transport.emit(message).await {
                    link.queue_local_candidate(candidate);
                    queued.for_each(|c| link.queue_local_candidate(c));
                    return Err(err);
                }
                sent += 1;
            }
        }
        if sent > 0 {
            tracing::debug!(%call_id, sent, "Flushed queued local candidates");
        }
        Ok(sent)
    }

    pub fn set_link_state(&mut self, participant: &ParticipantId, state: PeerState) -> bool {
        match self.links.get_mut(participant) {
            Some(link) => {
                link.set_state(state);
                true
            }
            None => false,
        }
    }

    pub fn set_media_flags(&mut self, participant: &ParticipantId, media: MediaFlags) -> bool {
        match self.links.get_mut(participant) {
            Some(link) => {
                link.set_media(media);
                true
            }
            None => false,
        }
    }

    pub fn close_link(&mut self, participant: &ParticipantId) -> bool {
        match self.links.remove(participant) {
            Some(mut link) => link.close(),
            None => false,
        }
    }

    /// Close every link and forget the negotiation context. Returns how many
    /// connections were closed.
    pub fn close_all(&mut self) -> usize {
        let closed = self
            .links
            .drain()
            .map(|(_, mut link)| link.close())
            .filter(|closed| *closed)
            .count();
        if let Some(active) = self.active.take() {
            tracing::debug!(call_id = %active.call_id, closed, "All participant links closed");
        }
        closed
    }
}
