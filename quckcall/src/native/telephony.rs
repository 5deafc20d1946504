use std::sync::Arc;

use async_trait::async_trait;
use quckcall_signaling::ConversationId;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::NativeError;

/// What the OS call screen reports back, keyed by the id it was shown with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeAction {
    Answer(Uuid),
    End(Uuid),
}

/// Request forwarded to the platform host that owns the OS call screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeRequest {
    DisplayIncoming {
        call_uuid: Uuid,
        caller_label: String,
        has_video: bool,
        conversation_id: ConversationId,
    },
    SetActive {
        call_uuid: Uuid,
    },
    End {
        call_uuid: Uuid,
    },
}

/// OS-level call UI.
#[async_trait]
pub trait NativeTelephony: Send + Sync {
    fn is_available(&self) -> bool;

    async fn display_incoming(
        &self,
        call_uuid: Uuid,
        caller_label: &str,
        has_video: bool,
        conversation_id: &ConversationId,
    ) -> Result<(), NativeError>;

    async fn set_active(&self, call_uuid: Uuid) -> Result<(), NativeError>;

    async fn end(&self, call_uuid: Uuid) -> Result<(), NativeError>;
}

/// Forwards every request to the platform host over a channel.
#[derive(Clone)]
pub struct ChannelTelephony {
    tx: mpsc::UnboundedSender<NativeRequest>,
}

impl ChannelTelephony {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NativeRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, request: NativeRequest) -> Result<(), NativeError> {
        self.tx.send(request).map_err(|_| NativeError::HostGone)
    }
}

#[async_trait]
impl NativeTelephony for ChannelTelephony {
    fn is_available(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn display_incoming(
        &self,
        call_uuid: Uuid,
        caller_label: &str,
        has_video: bool,
        conversation_id: &ConversationId,
    ) -> Result<(), NativeError> {
        self.forward(NativeRequest::DisplayIncoming {
            call_uuid,
            caller_label: caller_label.to_owned(),
            has_video,
            conversation_id: conversation_id.clone(),
        })
    }

    async fn set_active(&self, call_uuid: Uuid) -> Result<(), NativeError> {
        self.forward(NativeRequest::SetActive { call_uuid })
    }

    async fn end(&self, call_uuid: Uuid) -> Result<(), NativeError> {
        self.forward(NativeRequest::End { call_uuid })
    }
}

/// Platform without an OS call screen.
pub struct NoopTelephony;

#[async_trait]
impl NativeTelephony for NoopTelephony {
    fn is_available(&self) -> bool {
        false
    }

    async fn display_incoming(
        &self,
        _call_uuid: Uuid,
        _caller_label: &str,
        _has_video: bool,
        _conversation_id: &ConversationId,
    ) -> Result<(), NativeError> {
        Err(NativeError::Unavailable)
    }

    async fn set_active(&self, _call_uuid: Uuid) -> Result<(), NativeError> {
        Err(NativeError::Unavailable)
    }

    async fn end(&self, _call_uuid: Uuid) -> Result<(), NativeError> {
        Err(NativeError::Unavailable)
    }
}

/// Pick the telephony implementation once, at startup.
pub fn select_telephony(
    config: &EngineConfig,
    host: Option<ChannelTelephony>,
) -> Arc<dyn NativeTelephony> {
    match host {
        Some(host) if config.native_telephony => Arc::new(host),
        _ => {
            tracing::info!("Native call screen disabled, using no-op telephony");
            Arc::new(NoopTelephony)
        }
    }
}
