use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use quckcall_signaling::CallId;

use crate::models::{PendingCallRecord, PendingStatus};
use crate::storage::KvStore;

/// The single recovery record, kept under one well-known key.
#[derive(Clone)]
pub struct PendingCallStore {
    store: Arc<dyn KvStore>,
}

impl PendingCallStore {
    pub const KEY: &'static str = "pending_call";

    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Overwrites whatever record was there.
    pub async fn write_pending(&self, record: &PendingCallRecord) -> Result<(), anyhow::Error> {
        let raw = serde_json::to_string(record)
            .map_err(|e| anyhow!("Failed to serialize pending call: {}", e))?;
        self.store.put(Self::KEY, raw).await
    }

    /// A record that no longer parses is removed and reported as absent.
    pub async fn read_pending(&self) -> Result<Option<PendingCallRecord>, anyhow::Error> {
        let Some(raw) = self.store.get(Self::KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(%err, "Discarding unreadable pending call record");
                self.clear_pending().await?;
                Ok(None)
            }
        }
    }

    pub async fn clear_pending(&self) -> Result<(), anyhow::Error> {
        self.store.remove(Self::KEY).await
    }

    /// Clear the record only if it describes `call_id`.
    pub async fn clear_if_matches(&self, call_id: &CallId) -> Result<bool, anyhow::Error> {
        match self.read_pending().await? {
            Some(record) if &record.call_id == call_id => {
                self.clear_pending().await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Returns the updated record, or `None` when the stored one belongs to
    /// another call.
    pub async fn update_status(
        &self,
        call_id: &CallId,
        status: PendingStatus,
    ) -> Result<Option<PendingCallRecord>, anyhow::Error> {
        match self.read_pending().await? {
            Some(mut record) if &record.call_id == call_id => {
                record.status = status;
                self.write_pending(&record).await?;
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }
}

/// What process start should do with the stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    Nothing,
    /// Older than the ttl; cleared without ringing.
    Expired(PendingCallRecord),
    /// Declined on the OS screen while the app was gone.
    Declined(PendingCallRecord),
    Ring(PendingCallRecord),
    Answer(PendingCallRecord),
}

impl Recovery {
    pub fn classify(record: Option<PendingCallRecord>, now_epoch_ms: i64, ttl: Duration) -> Self {
        let Some(record) = record else {
            return Self::Nothing;
        };
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let ahead_ms = record.created_at_epoch_ms.saturating_sub(now_epoch_ms);
        if record.age_ms(now_epoch_ms) > ttl_ms || ahead_ms > ttl_ms {
            return Self::Expired(record);
        }
        match record.status {
            PendingStatus::Pending => Self::Ring(record),
            PendingStatus::Answered => Self::Answer(record),
            PendingStatus::Rejected => Self::Declined(record),
        }
    }
}
