use async_trait::async_trait;
use quckcall_signaling::{CallId, MediaKind, ParticipantId};

use crate::models::{CallPhase, MediaFlags};
use crate::peer::MediaTrack;

use super::EndReason;

#[async_trait]
pub trait CallListener: Send + Sync {
    async fn on_incoming_call(&self, call_id: &CallId, caller_label: &str, media_kind: MediaKind);
    async fn on_outgoing_call(&self, call_id: &CallId, media_kind: MediaKind);
    async fn on_call_state_changed(&self, call_id: &CallId, phase: CallPhase);
    async fn on_call_connected(&self, call_id: &CallId);
    async fn on_call_ended(&self, call_id: &CallId, reason: EndReason);
    /// A remote participant's track became available for rendering.
    async fn on_remote_track(&self, call_id: &CallId, participant: &ParticipantId, track: &MediaTrack);
    async fn on_participant_media_changed(&self, participant: &ParticipantId, media: MediaFlags);
}

pub struct StubListener;

#[async_trait]
impl CallListener for StubListener {
    async fn on_incoming_call(&self, _call_id: &CallId, _caller_label: &str, _media_kind: MediaKind) {}
    async fn on_outgoing_call(&self, _call_id: &CallId, _media_kind: MediaKind) {}
    async fn on_call_state_changed(&self, _call_id: &CallId, _phase: CallPhase) {}
    async fn on_call_connected(&self, _call_id: &CallId) {}
    async fn on_call_ended(&self, _call_id: &CallId, _reason: EndReason) {}
    async fn on_remote_track(&self, _call_id: &CallId, _participant: &ParticipantId, _track: &MediaTrack) {}
    async fn on_participant_media_changed(&self, _participant: &ParticipantId, _media: MediaFlags) {}
}
