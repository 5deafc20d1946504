use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::codec::{self, Frame};
use crate::{
    AnswerReply, CallId, ConversationId, IceServer, IncomingCall, InitiateReply, MediaKind,
    ParticipantId, ParticipantRef, SignalingError, SignalingMessage, SignalingStream,
    SignalingTransport,
};

#[derive(Debug, Clone)]
struct HubCall {
    initiator: ParticipantId,
    participants: Vec<ParticipantId>,
    conversation_id: ConversationId,
    media_kind: MediaKind,
}

impl HubCall {
    fn members(&self) -> impl Iterator<Item = &ParticipantId> {
        std::iter::once(&self.initiator).chain(self.participants.iter())
    }
}

struct ClientInfo {
    tx: mpsc::UnboundedSender<String>,
    online: Arc<AtomicBool>,
}

struct HubInner {
    clients: RwLock<HashMap<ParticipantId, ClientInfo>>,
    calls: RwLock<HashMap<CallId, HubCall>>,
    ice_servers: Vec<IceServer>,
    ack_counter: AtomicU64,
}

/// In-process signaling server.
///
/// Speaks the same frames as the real server: assigns call ids on
/// `call:initiate`, fans out `call:incoming`, relays SDP and ICE to the target
/// participant and stamps the sender on relayed messages.
#[derive(Clone)]
pub struct SignalingHub {
    inner: Arc<HubInner>,
}

impl SignalingHub {
    pub fn new(ice_servers: Vec<IceServer>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                clients: RwLock::new(HashMap::new()),
                calls: RwLock::new(HashMap::new()),
                ice_servers,
                ack_counter: AtomicU64::new(1),
            }),
        }
    }

    /// Register a participant and hand back its socket halves.
    pub fn connect(&self, participant: ParticipantId) -> (HubTransport, SignalingStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let online = Arc::new(AtomicBool::new(true));
        let client = ClientInfo {
            tx,
            online: online.clone(),
        };
        self.inner
            .clients
            .write()
            .unwrap()
            .insert(participant.clone(), client);
        tracing::info!(%participant, "Client connected to hub");
        let transport = HubTransport {
            inner: self.inner.clone(),
            participant,
            online,
        };
        (transport, SignalingStream::new(rx))
    }

    /// Simulate the participant's socket dropping or coming back.
    pub fn set_online(&self, participant: &ParticipantId, online: bool) {
        if let Some(client) = self.inner.clients.read().unwrap().get(participant) {
            client.online.store(online, Ordering::SeqCst);
            tracing::info!(%participant, online, "Client connectivity changed");
        }
    }

    /// Push an arbitrary event to a participant, as if the server sent it.
    pub fn deliver(&self, participant: &ParticipantId, message: SignalingMessage) {
        self.inner.deliver(participant, message);
    }

    pub fn active_calls(&self) -> usize {
        self.inner.calls.read().unwrap().len()
    }
}

impl HubInner {
    fn deliver(&self, participant: &ParticipantId, message: SignalingMessage) {
        let frame = Frame::Event { ack: None, message };
        let text = match codec::encode(&frame) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(%err, "Failed to encode frame");
                return;
            }
        };
        let clients = self.clients.read().unwrap();
        match clients.get(participant) {
            Some(client) => {
                if client.tx.send(text).is_err() {
                    tracing::debug!(%participant, "Client stream dropped");
                }
            }
            None => tracing::debug!(%participant, "Dropping event for unknown client"),
        }
    }

    fn handle_frame(&self, from: &ParticipantId, text: &str) -> Option<Result<Value, String>> {
        let (ack, message) = match codec::decode(text) {
            Ok(Frame::Event { ack, message }) => (ack, message),
            Ok(Frame::Ack { .. }) => return None,
            Err(err) => {
                tracing::warn!(%from, %err, "Failed to decode client frame");
                return None;
            }
        };
        tracing::debug!(%from, event = message.event_name(), "Received client event");
        let result = self.handle_message(from, message);
        ack.map(|_| result)
    }

    fn handle_message(&self, from: &ParticipantId, message: SignalingMessage) -> Result<Value, String> {
        match message {
            SignalingMessage::Initiate(request) => {
                let call_id = CallId::new(Uuid::now_v7().to_string());
                let call = HubCall {
                    initiator: from.clone(),
                    participants: request.participant_ids,
                    conversation_id: request.conversation_id,
                    media_kind: request.media_kind,
                };
                for participant in &call.participants {
                    self.deliver(
                        participant,
                        SignalingMessage::Incoming(IncomingCall {
                            call_id: call_id.clone(),
                            from_participant: from.clone(),
                            media_kind: call.media_kind,
                            conversation_id: call.conversation_id.clone(),
                            caller_name: None,
                        }),
                    );
                }
                tracing::info!(%call_id, initiator = %from, "Call initiated");
                self.calls.write().unwrap().insert(call_id.clone(), call);
                let reply = InitiateReply {
                    call_id,
                    ice_servers: self.ice_servers.clone(),
                };
                serde_json::to_value(reply).map_err(|e| e.to_string())
            }
            SignalingMessage::Answer(v) => {
                let call = self.find_call(&v.call_id)?;
                self.fan_out(&call, from, |_| {
                    SignalingMessage::Accepted(ParticipantRef {
                        call_id: v.call_id.clone(),
                        participant_id: from.clone(),
                    })
                });
                let reply = AnswerReply {
                    ice_servers: self.ice_servers.clone(),
                };
                serde_json::to_value(reply).map_err(|e| e.to_string())
            }
            SignalingMessage::Reject(v) => {
                let call = self.find_call(&v.call_id)?;
                self.fan_out(&call, from, |_| {
                    SignalingMessage::Rejected(ParticipantRef {
                        call_id: v.call_id.clone(),
                        participant_id: from.clone(),
                    })
                });
                let mut calls = self.calls.write().unwrap();
                if let Some(call) = calls.get_mut(&v.call_id) {
                    call.participants.retain(|p| p != from);
                    // Only the initiator is left, or the initiator gave up.
                    if call.participants.is_empty() || &call.initiator == from {
                        calls.remove(&v.call_id);
                    }
                }
                Ok(Value::Null)
            }
            SignalingMessage::End(v) => {
                let call = self.find_call(&v.call_id)?;
                self.fan_out(&call, from, |_| SignalingMessage::End(v.clone()));
                self.calls.write().unwrap().remove(&v.call_id);
                tracing::info!(call_id = %v.call_id, by = %from, "Call ended");
                Ok(Value::Null)
            }
            SignalingMessage::Offer(mut v) => {
                let target = v.target_participant.clone();
                v.from_participant = Some(from.clone());
                self.deliver(&target, SignalingMessage::Offer(v));
                Ok(Value::Null)
            }
            SignalingMessage::SdpAnswer(mut v) => {
                let target = v.target_participant.clone();
                v.from_participant = Some(from.clone());
                self.deliver(&target, SignalingMessage::SdpAnswer(v));
                Ok(Value::Null)
            }
            SignalingMessage::IceCandidate(mut v) => {
                let target = v.target_participant.clone();
                v.from_participant = Some(from.clone());
                self.deliver(&target, SignalingMessage::IceCandidate(v));
                Ok(Value::Null)
            }
            SignalingMessage::AudioToggled(v) => {
                self.fan_out_to_calls_of(from, SignalingMessage::AudioToggled(v));
                Ok(Value::Null)
            }
            SignalingMessage::VideoToggled(v) => {
                self.fan_out_to_calls_of(from, SignalingMessage::VideoToggled(v));
                Ok(Value::Null)
            }
            other @ (SignalingMessage::Incoming(_)
            | SignalingMessage::Accepted(_)
            | SignalingMessage::Rejected(_)) => {
                Err(format!("{} is server-originated", other.event_name()))
            }
        }
    }

    fn find_call(&self, call_id: &CallId) -> Result<HubCall, String> {
        self.calls
            .read()
            .unwrap()
            .get(call_id)
            .cloned()
            .ok_or_else(|| format!("call {call_id} not found"))
    }

    fn fan_out(
        &self,
        call: &HubCall,
        from: &ParticipantId,
        make: impl Fn(&ParticipantId) -> SignalingMessage,
    ) {
        for member in call.members().filter(|m| *m != from) {
            self.deliver(member, make(member));
        }
    }

    fn fan_out_to_calls_of(&self, from: &ParticipantId, message: SignalingMessage) {
        let calls: Vec<HubCall> = self
            .calls
            .read()
            .unwrap()
            .values()
            .filter(|call| call.members().any(|m| m == from))
            .cloned()
            .collect();
        for call in calls {
            self.fan_out(&call, from, |_| message.clone());
        }
    }
}

/// Client side of a hub connection.
pub struct HubTransport {
    inner: Arc<HubInner>,
    participant: ParticipantId,
    online: Arc<AtomicBool>,
}

impl HubTransport {
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    fn send_frame(&self, ack: Option<u64>, message: SignalingMessage) -> Result<Option<Value>, SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::Unavailable);
        }
        let event = message.event_name();
        let text = codec::encode(&Frame::Event { ack, message })?;
        let Some(result) = self.inner.handle_frame(&self.participant, &text) else {
            return Ok(None);
        };
        // Round-trip the acknowledgement through the codec like a socket would.
        let ack_text = codec::encode(&Frame::Ack {
            ack: ack.unwrap_or_default(),
            result,
        })?;
        match codec::decode(&ack_text)? {
            Frame::Ack { result: Ok(data), .. } => Ok(Some(data)),
            Frame::Ack {
                result: Err(reason),
                ..
            } => Err(SignalingError::Rejected {
                event: event.to_owned(),
                reason,
            }),
            Frame::Event { .. } => Err(SignalingError::Codec(serde::de::Error::custom(
                "expected acknowledgement",
            ))),
        }
    }
}

#[async_trait]
impl SignalingTransport for HubTransport {
    fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn emit(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        self.send_frame(None, message)?;
        Ok(())
    }

    async fn request(&self, message: SignalingMessage) -> Result<Value, SignalingError> {
        let ack = self.inner.ack_counter.fetch_add(1, Ordering::SeqCst);
        let data = self.send_frame(Some(ack), message)?;
        Ok(data.unwrap_or(Value::Null))
    }
}
