use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use quckcall_signaling::{
    CallId, CallRef, ConversationId, IceCandidate, IceCandidateMessage, IceServer, IncomingCall,
    InitiateCall, MediaKind, MediaToggle, ParticipantId, ParticipantRef, SessionDescription,
    SignalingMessage, SignalingTransport, SignalingTransportExt,
};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::CallError;
use crate::models::{CallDirection, CallPhase, CallSession, CallSnapshot, DateTime, PendingCallRecord};
use crate::native::{NativeAction, NativeCommand, NativeTelephony, NativeTelephonyBridge};
use crate::offer::OfferBuffer;
use crate::peer::{
    Description, LinkEvent, LinkEventKind, LocalMedia, MediaDevices, PeerConnectionFactory,
    PeerConnectionManager, PeerState, QualityPolicy, TrackKind,
};
use crate::pending::{PendingCallStore, Recovery};
use crate::storage::KvStore;

use super::{
    CallListener, CallState, EndReason, EngineCommand, EngineEvent, EngineHandle, EventReceiver,
    EventSender, StubListener, event,
};

/// Capabilities and settings an engine is built from.
pub struct EngineParts {
    pub local_participant: ParticipantId,
    pub config: EngineConfig,
    pub transport: Arc<dyn SignalingTransport>,
    pub media: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub telephony: Arc<dyn NativeTelephony>,
    pub store: Arc<dyn KvStore>,
}

/// Single source of truth for the call lifecycle.
///
/// Owns the current [`CallState`] and every resource of the call. Events are
/// applied one at a time through `&mut self`, so no transition ever observes
/// another one half done.
pub struct CallEngine {
    local_participant: ParticipantId,
    config: EngineConfig,
    state: CallState,
    peers: PeerConnectionManager,
    offers: OfferBuffer,
    native: NativeTelephonyBridge,
    pending: PendingCallStore,
    transport: Arc<dyn SignalingTransport>,
    media: Arc<dyn MediaDevices>,
    local_media: Option<LocalMedia>,
    listener: Arc<dyn CallListener>,
    recent_calls: VecDeque<CallId>,
    events: EventSender,
}

impl CallEngine {
    pub fn new(parts: EngineParts) -> (Self, EventReceiver) {
        Self::with_listener(parts, Arc::new(StubListener))
    }

    pub fn with_listener<L>(parts: EngineParts, listener: Arc<L>) -> (Self, EventReceiver)
    where
        L: CallListener + 'static,
    {
        let (events, rx) = event::channel();
        let quality = QualityPolicy::from_config(&parts.config);
        let engine = Self {
            peers: PeerConnectionManager::new(
                parts.peers,
                parts.transport.clone(),
                events.clone(),
                quality,
            ),
            native: NativeTelephonyBridge::new(parts.telephony),
            pending: PendingCallStore::new(parts.store),
            recent_calls: VecDeque::with_capacity(parts.config.recent_calls),
            local_participant: parts.local_participant,
            config: parts.config,
            state: CallState::Idle,
            offers: OfferBuffer::new(),
            transport: parts.transport,
            media: parts.media,
            local_media: None,
            listener,
            events,
        };
        (engine, rx)
    }

    /// Run the engine on its own task.
    pub fn spawn(self, rx: EventReceiver) -> (EngineHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run(rx)))
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.events.clone())
    }

    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn local_participant(&self) -> &ParticipantId {
        &self.local_participant
    }

    pub fn phase(&self) -> CallPhase {
        self.state.phase()
    }

    pub fn snapshot(&self) -> Option<CallSnapshot> {
        self.state.snapshot()
    }

    pub fn peers(&self) -> &PeerConnectionManager {
        &self.peers
    }

    pub fn offers(&self) -> &OfferBuffer {
        &self.offers
    }

    pub fn native(&self) -> &NativeTelephonyBridge {
        &self.native
    }

    pub fn has_local_media(&self) -> bool {
        self.local_media.is_some()
    }

    pub async fn run(mut self, mut rx: EventReceiver) {
        tracing::info!("Call engine for {} started", self.local_participant);
        while let Some(event) = rx.recv().await {
            if !self.dispatch(event).await {
                break;
            }
        }
        tracing::info!("Call engine for {} stopped", self.local_participant);
    }

    /// Apply one event. Returns `false` when the engine was asked to stop.
    pub async fn dispatch(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Signal(message) => self.handle_signal(message).await,
            EngineEvent::Link(event) => self.handle_link_event(event).await,
            EngineEvent::Native(action) => self.handle_native(action).await,
            EngineEvent::TransportConnected => self.on_transport_connected().await,
            EngineEvent::Command(command) => return self.handle_command(command).await,
        }
        true
    }

    async fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::StartCall {
                conversation_id,
                participants,
                media_kind,
                reply,
            } => {
                let result = self
                    .start_call(conversation_id, participants, media_kind)
                    .await;
                let _ = reply.send(result);
            }
            EngineCommand::Accept { call_id, reply } => {
                let _ = reply.send(self.accept_call(&call_id).await);
            }
            EngineCommand::Reject { call_id, reply } => {
                let _ = reply.send(self.reject_call(&call_id).await);
            }
            EngineCommand::HangUp { call_id, reply } => {
                let _ = reply.send(self.hang_up(&call_id).await);
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            EngineCommand::Shutdown { reply } => {
                self.end_call(EndReason::HangUp).await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn is_active(&self, call_id: &CallId) -> bool {
        self.state.call_id() == Some(call_id)
    }

    fn ice_servers(&self, offered: Vec<IceServer>) -> Vec<IceServer> {
        if offered.is_empty() {
            self.config.default_ice_servers.clone()
        } else {
            offered
        }
    }

    pub async fn start_call(
        &mut self,
        conversation_id: ConversationId,
        participants: Vec<ParticipantId>,
        media_kind: MediaKind,
    ) -> Result<CallId, CallError> {
        if !self.state.is_idle() {
            tracing::warn!("Cannot start call - already in a call");
            return Err(CallError::Busy);
        }
        let targets: BTreeSet<ParticipantId> = participants
            .into_iter()
            .filter(|p| p != &self.local_participant)
            .collect();
        if targets.is_empty() {
            tracing::warn!("Cannot start call in {} - nobody to call", conversation_id);
            return Err(CallError::NoParticipants);
        }
        tracing::info!(
            "Starting {} call in {} with {} participant(s)",
            media_kind,
            conversation_id,
            targets.len()
        );

        let media = match LocalMedia::acquire(self.media.clone(), media_kind).await {
            Ok(media) => media,
            Err(err) => {
                tracing::warn!("Cannot start call - local media unavailable: {}", err);
                return Err(err.into());
            }
        };
        let request = InitiateCall {
            conversation_id: conversation_id.clone(),
            participant_ids: targets.iter().cloned().collect(),
            media_kind,
        };
        let reply = match self.transport.initiate(request).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!("Failed to initiate call: {}", err);
                media.stop();
                return Err(err.into());
            }
        };

        let call_id = reply.call_id;
        let ice_servers = self.ice_servers(reply.ice_servers);
        self.peers
            .begin(call_id.clone(), ice_servers, media.tracks().to_vec());
        self.local_media = Some(media);
        self.state = CallState::Dialing(CallSession::outgoing(
            call_id.clone(),
            media_kind,
            conversation_id,
            targets.iter().cloned(),
        ));
        tracing::info!("Call {} initiated, dialing", call_id);
        self.listener.on_outgoing_call(&call_id, media_kind).await;
        self.listener
            .on_call_state_changed(&call_id, CallPhase::Dialing)
            .await;

        let mut last_error = None;
        for target in &targets {
            if let Err(err) = self.send_offer(&call_id, target).await {
                tracing::warn!(%call_id, participant = %target, "Failed to send offer: {}", err);
                self.peers.close_link(target);
                last_error = Some(err);
            }
        }
        if self.peers.is_empty() {
            if let Some(err) = last_error {
                self.end_call(EndReason::ConnectionFailed).await;
                return Err(err);
            }
        }
        Ok(call_id)
    }

    async fn send_offer(&mut self, call_id: &CallId, target: &ParticipantId) -> Result<(), CallError> {
        let peer_error = |source| CallError::Peer {
            participant: target.clone(),
            source,
        };
        self.peers.create_link(target).await.map_err(peer_error)?;
        let sdp = self
            .peers
            .create_local_offer(target)
            .await
            .map_err(peer_error)?;
        self.transport
            .emit(SignalingMessage::Offer(SessionDescription {
                call_id: call_id.clone(),
                target_participant: target.clone(),
                from_participant: None,
                sdp,
            }))
            .await?;
        tracing::debug!(%call_id, participant = %target, "Offer sent");
        Ok(())
    }

    /// Accept the ringing call. Accepting a call that is already being
    /// connected is a no-op, so the in-app button and the OS call screen can
    /// race freely.
    pub async fn accept_call(&mut self, call_id: &CallId) -> Result<(), CallError> {
        if !self.is_active(call_id) {
            tracing::debug!(%call_id, "Ignoring accept for inactive call");
            return Ok(());
        }
        let media_kind = match &self.state {
            CallState::RingingIncoming(session) => session.media_kind,
            CallState::Connecting(_) | CallState::Connected(_) => {
                tracing::debug!(%call_id, "Call already accepted");
                return Ok(());
            }
            CallState::Dialing(_) | CallState::Idle => {
                tracing::debug!(%call_id, "Only incoming calls can be accepted");
                return Ok(());
            }
        };
        tracing::info!("Accepting call {}", call_id);

        let media = match LocalMedia::acquire(self.media.clone(), media_kind).await {
            Ok(media) => media,
            Err(err) => {
                tracing::warn!("Cannot accept call {} - local media unavailable: {}", call_id, err);
                return Err(err.into());
            }
        };
        let reply = match self.transport.answer(call_id.clone()).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!("Failed to answer call {}, abandoning it: {}", call_id, err);
                media.stop();
                self.end_call(EndReason::AnswerFailed).await;
                return Err(err.into());
            }
        };

        let ice_servers = self.ice_servers(reply.ice_servers);
        self.peers
            .begin(call_id.clone(), ice_servers, media.tracks().to_vec());
        self.local_media = Some(media);
        self.state = match self.state.take() {
            CallState::RingingIncoming(session) => CallState::Connecting(session),
            other => other,
        };
        self.clear_pending_for(call_id).await;
        self.listener
            .on_call_state_changed(call_id, CallPhase::Connecting)
            .await;
        self.drain_offers(call_id).await;
        Ok(())
    }

    pub async fn reject_call(&mut self, call_id: &CallId) -> Result<(), CallError> {
        if !self.is_active(call_id) {
            tracing::debug!(%call_id, "Ignoring reject for inactive call");
            return Ok(());
        }
        let reason = match self.state.phase() {
            CallPhase::RingingIncoming => EndReason::Declined,
            _ => EndReason::HangUp,
        };
        self.end_call(reason).await;
        Ok(())
    }

    pub async fn hang_up(&mut self, call_id: &CallId) -> Result<(), CallError> {
        if !self.is_active(call_id) {
            tracing::debug!(%call_id, "Call already ended");
            return Ok(());
        }
        self.end_call(EndReason::HangUp).await;
        Ok(())
    }

    pub async fn handle_signal(&mut self, message: SignalingMessage) {
        tracing::trace!(event = message.event_name(), "Signaling event");
        match message {
            SignalingMessage::Incoming(incoming) => self.on_incoming(incoming).await,
            SignalingMessage::Accepted(accepted) => self.on_remote_accepted(accepted).await,
            SignalingMessage::Rejected(rejected) => self.on_remote_rejected(rejected).await,
            SignalingMessage::End(end) => self.on_remote_end(end).await,
            SignalingMessage::Offer(offer) => self.on_remote_offer(offer).await,
            SignalingMessage::SdpAnswer(answer) => self.on_remote_answer(answer).await,
            SignalingMessage::IceCandidate(candidate) => self.on_remote_candidate(candidate).await,
            SignalingMessage::AudioToggled(toggle) => {
                self.on_media_toggle(toggle, TrackKind::Audio).await
            }
            SignalingMessage::VideoToggled(toggle) => {
                self.on_media_toggle(toggle, TrackKind::Video).await
            }
            SignalingMessage::Initiate(_) | SignalingMessage::Answer(_) | SignalingMessage::Reject(_) => {
                tracing::debug!("Ignoring client-originated event from server");
            }
        }
    }

    async fn on_incoming(&mut self, incoming: IncomingCall) {
        let call_id = incoming.call_id.clone();
        if self.recent_calls.contains(&call_id) {
            tracing::debug!(%call_id, "Ignoring redelivered incoming call");
            return;
        }
        if let Some(active) = self.state.call_id() {
            if active == &call_id {
                tracing::debug!(%call_id, "Ignoring duplicate incoming call");
            } else {
                tracing::info!("Already in call {}, ignoring incoming call {}", active, call_id);
            }
            return;
        }

        let session = CallSession::incoming(
            call_id.clone(),
            incoming.media_kind,
            incoming.conversation_id,
            Some(incoming.from_participant),
            incoming.caller_name,
        );
        let label = session.caller_label();
        let media_kind = session.media_kind;
        let conversation_id = session.conversation_id.clone();
        tracing::info!("Incoming {} call {} from {}", media_kind, call_id, label);
        self.state = CallState::RingingIncoming(session);
        self.native
            .display_incoming(&call_id, &label, media_kind, &conversation_id)
            .await;
        self.listener
            .on_incoming_call(&call_id, &label, media_kind)
            .await;
        self.listener
            .on_call_state_changed(&call_id, CallPhase::RingingIncoming)
            .await;
    }

    async fn on_remote_accepted(&mut self, accepted: ParticipantRef) {
        if !self.is_active(&accepted.call_id) {
            tracing::debug!(call_id = %accepted.call_id, "Ignoring acceptance of inactive call");
            return;
        }
        match self.state.phase() {
            CallPhase::Dialing => {
                tracing::info!("{} accepted call {}", accepted.participant_id, accepted.call_id);
                self.connect_outgoing().await;
            }
            phase => {
                tracing::debug!(participant = %accepted.participant_id, %phase, "Acceptance absorbed");
            }
        }
    }

    async fn connect_outgoing(&mut self) {
        self.state = match self.state.take() {
            CallState::Dialing(session) => CallState::Connecting(session),
            other => other,
        };
        let Some(call_id) = self.state.call_id().cloned() else {
            return;
        };
        self.listener
            .on_call_state_changed(&call_id, CallPhase::Connecting)
            .await;
        self.drain_offers(&call_id).await;
    }

    async fn on_remote_rejected(&mut self, rejected: ParticipantRef) {
        if !self.is_active(&rejected.call_id) {
            tracing::debug!(call_id = %rejected.call_id, "Ignoring rejection of inactive call");
            return;
        }
        let outgoing = self
            .state
            .session()
            .is_some_and(|session| session.direction == CallDirection::Outgoing);
        let dialed = self
            .state
            .session()
            .is_some_and(|session| session.participants.contains(&rejected.participant_id))
            || self.peers.link(&rejected.participant_id).is_some();
        if !outgoing || !dialed {
            tracing::debug!(participant = %rejected.participant_id, "Another callee declined");
            return;
        }
        self.peers.close_link(&rejected.participant_id);
        if let Some(session) = self.state.session_mut() {
            session.participants.remove(&rejected.participant_id);
        }
        if self.peers.is_empty() {
            self.end_call(EndReason::RemoteRejected).await;
        } else {
            tracing::info!("{} declined call {}", rejected.participant_id, rejected.call_id);
        }
    }

    async fn on_remote_end(&mut self, end: CallRef) {
        if !self.is_active(&end.call_id) {
            tracing::debug!(call_id = %end.call_id, "Ignoring end of inactive call");
            return;
        }
        self.end_call(EndReason::RemoteEnded).await;
    }

    async fn on_remote_offer(&mut self, offer: SessionDescription) {
        if !self.is_active(&offer.call_id) {
            tracing::debug!(call_id = %offer.call_id, "Ignoring offer for inactive call");
            return;
        }
        let Some(from) = offer.from_participant else {
            tracing::warn!(call_id = %offer.call_id, "Offer without sender");
            return;
        };
        match self.state.phase() {
            CallPhase::Dialing | CallPhase::RingingIncoming => {
                let replaced = self.offers.buffer(offer.call_id, from.clone(), offer.sdp);
                tracing::debug!(participant = %from, replaced, "Offer buffered until the call is accepted");
            }
            CallPhase::Connecting | CallPhase::Connected => {
                self.answer_offer(&offer.call_id, from, offer.sdp, Vec::new())
                    .await;
            }
            CallPhase::Idle | CallPhase::Ended => {}
        }
    }

    async fn drain_offers(&mut self, call_id: &CallId) {
        for offer in self.offers.drain(call_id) {
            if !self.is_active(call_id) {
                break;
            }
            tracing::debug!(
                participant = %offer.from_participant,
                candidates = offer.candidates.len(),
                "Releasing buffered offer"
            );
            self.answer_offer(call_id, offer.from_participant, offer.sdp, offer.candidates)
                .await;
        }
    }

    async fn answer_offer(
        &mut self,
        call_id: &CallId,
        from: ParticipantId,
        sdp: String,
        candidates: Vec<IceCandidate>,
    ) {
        if let Err(err) = self.peers.create_link(&from).await {
            tracing::warn!(%call_id, participant = %from, "Failed to create link: {}", err);
            return;
        }
        if let Some(session) = self.state.session_mut() {
            session.participants.insert(from.clone());
        }
        if let Err(err) = self
            .peers
            .apply_remote_description(&from, Description::offer(sdp))
            .await
        {
            tracing::warn!(%call_id, participant = %from, "Offer rejected: {}", err);
            return;
        }
        for candidate in candidates {
            if let Err(err) = self.peers.add_remote_ice_candidate(&from, candidate).await {
                tracing::warn!(participant = %from, "Failed to apply buffered candidate: {}", err);
            }
        }
        let sdp = match self.peers.create_local_answer(&from).await {
            Ok(sdp) => sdp,
            Err(err) => {
                tracing::warn!(%call_id, participant = %from, "Failed to create answer: {}", err);
                self.peers.close_link(&from);
                return;
            }
        };
        let message = SignalingMessage::SdpAnswer(SessionDescription {
            call_id: call_id.clone(),
            target_participant: from.clone(),
            from_participant: None,
            sdp,
        });
        match self.transport.emit(message).await {
            Ok(()) => tracing::debug!(%call_id, participant = %from, "Answer sent"),
            Err(err) => tracing::warn!(%call_id, participant = %from, "Failed to send answer: {}", err),
        }
    }

    async fn on_remote_answer(&mut self, answer: SessionDescription) {
        if !self.is_active(&answer.call_id) {
            tracing::debug!(call_id = %answer.call_id, "Ignoring answer for inactive call");
            return;
        }
        let Some(from) = answer.from_participant else {
            tracing::warn!(call_id = %answer.call_id, "Answer without sender");
            return;
        };
        if self.peers.link(&from).is_none() {
            tracing::debug!(participant = %from, "Answer from participant that was never offered");
            return;
        }
        match self.state.phase() {
            CallPhase::Dialing => {
                tracing::info!("Answer from {} accepts call {}", from, answer.call_id);
                self.connect_outgoing().await;
                if !self.is_active(&answer.call_id) {
                    return;
                }
            }
            CallPhase::Connecting | CallPhase::Connected => {}
            phase => {
                tracing::debug!(participant = %from, %phase, "Unexpected answer ignored");
                return;
            }
        }
        if let Err(err) = self
            .peers
            .apply_remote_description(&from, Description::answer(answer.sdp))
            .await
        {
            tracing::warn!(call_id = %answer.call_id, participant = %from, "Answer rejected: {}", err);
        }
    }

    async fn on_remote_candidate(&mut self, message: IceCandidateMessage) {
        if !self.is_active(&message.call_id) {
            tracing::debug!(call_id = %message.call_id, "Ignoring candidate for inactive call");
            return;
        }
        let Some(from) = message.from_participant else {
            tracing::warn!(call_id = %message.call_id, "Candidate without sender");
            return;
        };
        if self.peers.link(&from).is_some() {
            if let Err(err) = self
                .peers
                .add_remote_ice_candidate(&from, message.candidate)
                .await
            {
                tracing::warn!(participant = %from, "Failed to add remote candidate: {}", err);
            }
        } else if !self
            .offers
            .buffer_candidate(&message.call_id, &from, message.candidate)
        {
            tracing::debug!(participant = %from, "Dropping candidate with no link or buffered offer");
        }
    }

    async fn on_media_toggle(&mut self, toggle: MediaToggle, kind: TrackKind) {
        let Some(mut media) = self.peers.link(&toggle.participant_id).map(|l| l.media()) else {
            tracing::debug!(participant = %toggle.participant_id, "Media toggle for unknown participant");
            return;
        };
        match kind {
            TrackKind::Audio => media.audio = toggle.enabled,
            TrackKind::Video => media.video = toggle.enabled,
        }
        self.peers.set_media_flags(&toggle.participant_id, media);
        self.listener
            .on_participant_media_changed(&toggle.participant_id, media)
            .await;
    }

    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        if !self.is_active(&event.call_id) {
            tracing::debug!(call_id = %event.call_id, "Dropping link event of inactive call");
            return;
        }
        let LinkEvent {
            call_id,
            participant,
            kind,
        } = event;
        match kind {
            LinkEventKind::IceCandidate(candidate) => {
                if let Err(err) = self
                    .peers
                    .forward_local_candidate(&participant, candidate)
                    .await
                {
                    tracing::warn!(%participant, "Failed to send local candidate: {}", err);
                }
            }
            LinkEventKind::Track(track) => {
                tracing::debug!(%participant, track = %track.id, "Remote track");
                self.listener
                    .on_remote_track(&call_id, &participant, &track)
                    .await;
            }
            LinkEventKind::State(state) => self.on_link_state(&participant, state).await,
        }
    }

    async fn on_link_state(&mut self, participant: &ParticipantId, state: PeerState) {
        if !self.peers.set_link_state(participant, state) {
            tracing::debug!(%participant, ?state, "State of closed link ignored");
            return;
        }
        match state {
            PeerState::Connected => {
                if self.state.phase() == CallPhase::Connecting {
                    self.enter_connected().await;
                }
            }
            PeerState::Failed | PeerState::Closed => {
                tracing::warn!("Link to {} is {:?}", participant, state);
                self.peers.close_link(participant);
                self.after_link_lost().await;
            }
            PeerState::New | PeerState::Connecting | PeerState::Disconnected => {
                tracing::debug!(%participant, ?state, "Link state changed");
            }
        }
    }

    async fn enter_connected(&mut self) {
        self.state = match self.state.take() {
            CallState::Connecting(mut session) => {
                session.audio_active = true;
                CallState::Connected(session)
            }
            other => other,
        };
        let Some(call_id) = self.state.call_id().cloned() else {
            return;
        };
        tracing::info!("Call {} connected", call_id);
        self.native.report_connected(&call_id).await;
        self.clear_pending_for(&call_id).await;
        self.listener
            .on_call_state_changed(&call_id, CallPhase::Connected)
            .await;
        self.listener.on_call_connected(&call_id).await;
    }

    /// A call whose every link failed cannot carry media any more. A rejected
    /// description closes only its own link and never gets here.
    async fn after_link_lost(&mut self) {
        let phase = self.state.phase();
        if matches!(phase, CallPhase::Connecting | CallPhase::Connected) && self.peers.is_empty() {
            tracing::warn!("No participant links left");
            self.end_call(EndReason::ConnectionFailed).await;
        }
    }

    pub async fn handle_native(&mut self, action: NativeAction) {
        let Some(command) = self.native.resolve(action) else {
            tracing::debug!(?action, "Native action for unknown call");
            return;
        };
        match command {
            NativeCommand::Answer(call_id) => {
                tracing::info!("Call {} answered from call screen", call_id);
                if let Err(err) = self.accept_call(&call_id).await {
                    tracing::warn!("Native answer of {} failed: {}", call_id, err);
                }
            }
            NativeCommand::Reject(call_id) => {
                if self.is_active(&call_id) {
                    self.end_call(EndReason::NativeEnded).await;
                }
            }
        }
    }

    async fn on_transport_connected(&mut self) {
        match self.peers.flush_local_candidates().await {
            Ok(0) => {}
            Ok(sent) => tracing::debug!(sent, "Queued candidates delivered"),
            Err(err) => tracing::warn!("Failed to flush queued candidates: {}", err),
        }
    }

    /// Tear the current call down. Runs at most once per call; returns
    /// `false` when there was nothing to end.
    async fn end_call(&mut self, reason: EndReason) -> bool {
        let previous = self.state.take();
        let phase = previous.phase();
        let Some(session) = previous.into_session() else {
            return false;
        };
        let call_id = session.call_id;
        tracing::info!("Ending call {} in phase {}: {}", call_id, phase, reason);

        let closed = self.peers.close_all();
        if let Some(media) = self.local_media.take() {
            media.stop();
        }
        let discarded = self.offers.discard(&call_id);
        tracing::debug!(%call_id, closed, discarded, "Call resources released");
        self.native.end_native(&call_id).await;
        self.clear_pending_for(&call_id).await;

        if reason.is_local() {
            let message = match phase {
                CallPhase::RingingIncoming => SignalingMessage::Reject(CallRef::new(call_id.clone())),
                _ => SignalingMessage::End(CallRef::new(call_id.clone())),
            };
            if let Err(err) = self.transport.emit(message).await {
                tracing::warn!(%call_id, "Failed to announce call end: {}", err);
            }
        }
        self.remember(call_id.clone());
        self.listener
            .on_call_state_changed(&call_id, CallPhase::Ended)
            .await;
        self.listener.on_call_ended(&call_id, reason).await;
        true
    }

    fn remember(&mut self, call_id: CallId) {
        if self.config.recent_calls == 0 {
            return;
        }
        while self.recent_calls.len() >= self.config.recent_calls {
            self.recent_calls.pop_front();
        }
        self.recent_calls.push_back(call_id);
    }

    /// Pick up a call the background handler recorded while the app was not
    /// running. Call once, on process start.
    pub async fn recover_pending(&mut self) -> Option<CallId> {
        self.recover_pending_at(DateTime::now().epoch_millis()).await
    }

    pub async fn recover_pending_at(&mut self, now_epoch_ms: i64) -> Option<CallId> {
        if !self.state.is_idle() {
            tracing::debug!("Skipping pending call recovery, a call is live");
            return None;
        }
        let record = match self.pending.read_pending().await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!("Failed to read pending call: {}", err);
                return None;
            }
        };
        match Recovery::classify(record, now_epoch_ms, self.config.pending_call_ttl()) {
            Recovery::Nothing => None,
            Recovery::Expired(record) => {
                tracing::info!(
                    "Pending call {} is {} ms old, dropping it",
                    record.call_id,
                    record.age_ms(now_epoch_ms)
                );
                self.clear_pending().await;
                None
            }
            Recovery::Declined(record) => {
                tracing::info!("Pending call {} was declined from call screen", record.call_id);
                self.clear_pending().await;
                let message = SignalingMessage::Reject(CallRef::new(record.call_id.clone()));
                if let Err(err) = self.transport.emit(message).await {
                    tracing::warn!(call_id = %record.call_id, "Failed to reject pending call: {}", err);
                }
                self.remember(record.call_id);
                None
            }
            Recovery::Ring(record) => self.resurrect(record, false).await,
            Recovery::Answer(record) => self.resurrect(record, true).await,
        }
    }

    async fn resurrect(&mut self, record: PendingCallRecord, answered: bool) -> Option<CallId> {
        let call_id = record.call_id.clone();
        if self.recent_calls.contains(&call_id) {
            tracing::debug!(%call_id, "Pending call already ended");
            self.clear_pending().await;
            return None;
        }
        tracing::info!("Recovering call {} (answered: {})", call_id, answered);
        let session = CallSession::incoming(
            call_id.clone(),
            record.media_kind,
            record.conversation_id,
            record.caller_id,
            Some(record.caller_display_name),
        );
        let label = session.caller_label();
        let media_kind = session.media_kind;
        self.native.adopt(record.call_uuid, call_id.clone());
        self.state = CallState::RingingIncoming(session);
        self.listener
            .on_incoming_call(&call_id, &label, media_kind)
            .await;
        self.listener
            .on_call_state_changed(&call_id, CallPhase::RingingIncoming)
            .await;
        if answered {
            if let Err(err) = self.accept_call(&call_id).await {
                tracing::warn!("Failed to accept recovered call {}: {}", call_id, err);
            }
        }
        Some(call_id)
    }

    async fn clear_pending(&self) {
        if let Err(err) = self.pending.clear_pending().await {
            tracing::warn!("Failed to clear pending call: {}", err);
        }
    }

    async fn clear_pending_for(&self, call_id: &CallId) {
        match self.pending.clear_if_matches(call_id).await {
            Ok(true) => tracing::debug!(%call_id, "Pending call record cleared"),
            Ok(false) => {}
            Err(err) => tracing::warn!(%call_id, "Failed to clear pending call: {}", err),
        }
    }
}
