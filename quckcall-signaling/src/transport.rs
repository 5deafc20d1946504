use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::codec::{self, Frame};
use crate::{
    AnswerReply, CallId, CallRef, InitiateCall, InitiateReply, SignalingError, SignalingMessage,
};

/// Outbound half of the signaling connection.
///
/// The channel is ordered and at-least-once. Implementations fail fast with
/// [`SignalingError::Unavailable`] while disconnected and never retry on their own.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Fire-and-forget event.
    async fn emit(&self, message: SignalingMessage) -> Result<(), SignalingError>;

    /// Event that expects an acknowledgement payload.
    async fn request(&self, message: SignalingMessage) -> Result<Value, SignalingError>;
}

/// Typed wrappers for the two requests that carry a reply.
#[async_trait]
pub trait SignalingTransportExt: SignalingTransport {
    async fn initiate(&self, request: InitiateCall) -> Result<InitiateReply, SignalingError> {
        let data = self.request(SignalingMessage::Initiate(request)).await?;
        codec::decode_reply(data)
    }

    async fn answer(&self, call_id: CallId) -> Result<AnswerReply, SignalingError> {
        let data = self
            .request(SignalingMessage::Answer(CallRef::new(call_id)))
            .await?;
        codec::decode_reply(data)
    }
}

impl<T: SignalingTransport + ?Sized> SignalingTransportExt for T {}

/// Inbound half: raw text frames from the socket, decoded lazily.
pub struct SignalingStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl SignalingStream {
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// Next decodable event. Unknown events and malformed frames are skipped,
    /// acknowledgements never reach this stream.
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        loop {
            let text = self.rx.recv().await?;
            match codec::decode(&text) {
                Ok(Frame::Event { message, .. }) => return Some(message),
                Ok(Frame::Ack { ack, .. }) => {
                    tracing::debug!(ack, "Dropping unsolicited acknowledgement");
                }
                Err(SignalingError::UnknownEvent(event)) => {
                    tracing::debug!(%event, "Ignoring unknown signaling event");
                }
                Err(err) => {
                    tracing::warn!(%err, "Dropping malformed signaling frame");
                }
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<SignalingMessage> {
        while let Ok(text) = self.rx.try_recv() {
            match codec::decode(&text) {
                Ok(Frame::Event { message, .. }) => return Some(message),
                Ok(Frame::Ack { .. }) | Err(SignalingError::UnknownEvent(_)) => {}
                Err(err) => tracing::warn!(%err, "Dropping malformed signaling frame"),
            }
        }
        None
    }
}
