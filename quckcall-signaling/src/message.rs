use serde::{Deserialize, Serialize};

use crate::{CallId, ConversationId, MediaKind, ParticipantId};

/// Every event exchanged with the signaling server.
///
/// Serialized as `{"event": "<name>", "data": {...}}`, which is the shape the
/// server speaks on its socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    #[serde(rename = "call:initiate")]
    Initiate(InitiateCall),
    #[serde(rename = "call:incoming")]
    Incoming(IncomingCall),
    #[serde(rename = "call:answer")]
    Answer(CallRef),
    #[serde(rename = "call:reject")]
    Reject(CallRef),
    #[serde(rename = "call:accepted")]
    Accepted(ParticipantRef),
    #[serde(rename = "call:rejected")]
    Rejected(ParticipantRef),
    #[serde(rename = "call:end")]
    End(CallRef),
    #[serde(rename = "webrtc:offer")]
    Offer(SessionDescription),
    #[serde(rename = "webrtc:answer")]
    SdpAnswer(SessionDescription),
    #[serde(rename = "webrtc:ice-candidate")]
    IceCandidate(IceCandidateMessage),
    #[serde(rename = "call:participant:audio-toggled")]
    AudioToggled(MediaToggle),
    #[serde(rename = "call:participant:video-toggled")]
    VideoToggled(MediaToggle),
}

impl SignalingMessage {
    pub const EVENTS: &'static [&'static str] = &[
        "call:initiate",
        "call:incoming",
        "call:answer",
        "call:reject",
        "call:accepted",
        "call:rejected",
        "call:end",
        "webrtc:offer",
        "webrtc:answer",
        "webrtc:ice-candidate",
        "call:participant:audio-toggled",
        "call:participant:video-toggled",
    ];

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Initiate(_) => "call:initiate",
            Self::Incoming(_) => "call:incoming",
            Self::Answer(_) => "call:answer",
            Self::Reject(_) => "call:reject",
            Self::Accepted(_) => "call:accepted",
            Self::Rejected(_) => "call:rejected",
            Self::End(_) => "call:end",
            Self::Offer(_) => "webrtc:offer",
            Self::SdpAnswer(_) => "webrtc:answer",
            Self::IceCandidate(_) => "webrtc:ice-candidate",
            Self::AudioToggled(_) => "call:participant:audio-toggled",
            Self::VideoToggled(_) => "call:participant:video-toggled",
        }
    }

    /// The call this message belongs to. Initiation and media toggles carry none.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::Initiate(_) | Self::AudioToggled(_) | Self::VideoToggled(_) => None,
            Self::Incoming(v) => Some(&v.call_id),
            Self::Answer(v) | Self::Reject(v) | Self::End(v) => Some(&v.call_id),
            Self::Accepted(v) | Self::Rejected(v) => Some(&v.call_id),
            Self::Offer(v) | Self::SdpAnswer(v) => Some(&v.call_id),
            Self::IceCandidate(v) => Some(&v.call_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCall {
    pub conversation_id: ConversationId,
    pub participant_ids: Vec<ParticipantId>,
    pub media_kind: MediaKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateReply {
    pub call_id: CallId,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReply {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub call_id: CallId,
    pub from_participant: ParticipantId,
    pub media_kind: MediaKind,
    pub conversation_id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub call_id: CallId,
}

impl CallRef {
    pub fn new(call_id: CallId) -> Self {
        Self { call_id }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRef {
    pub call_id: CallId,
    pub participant_id: ParticipantId,
}

/// Offer or answer SDP. `from_participant` is stamped by the server on
/// delivery; senders leave it empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    pub call_id: CallId,
    pub target_participant: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_participant: Option<ParticipantId>,
    pub sdp: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateMessage {
    pub call_id: CallId,
    pub target_participant: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_participant: Option<ParticipantId>,
    pub candidate: IceCandidate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaToggle {
    pub participant_id: ParticipantId,
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}
