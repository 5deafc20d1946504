use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use quckcall_signaling::IceServer;
use serde::{Deserialize, Serialize};

use crate::storage::KvStore;

/// Tunables of the call engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// A pending call record older than this never rings again.
    pub pending_call_ttl_secs: u64,
    /// Opus target bitrate written into outbound descriptions.
    pub audio_bitrate_bps: u32,
    /// Bandwidth cap for video sections of outbound descriptions.
    pub video_bandwidth_kbps: u32,
    /// Used when the server hands out no ICE servers.
    pub default_ice_servers: Vec<IceServer>,
    /// Whether to use the OS call screen when the platform offers one.
    pub native_telephony: bool,
    /// How many ended call ids are remembered to absorb redelivered events.
    pub recent_calls: usize,
}

impl EngineConfig {
    pub const MIN_AUDIO_BITRATE_BPS: u32 = 64_000;
    pub const MAX_AUDIO_BITRATE_BPS: u32 = 128_000;

    pub fn pending_call_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_call_ttl_secs)
    }

    pub fn audio_bitrate(&self) -> u32 {
        self.audio_bitrate_bps
            .clamp(Self::MIN_AUDIO_BITRATE_BPS, Self::MAX_AUDIO_BITRATE_BPS)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_call_ttl_secs: 60,
            audio_bitrate_bps: Self::MAX_AUDIO_BITRATE_BPS,
            video_bandwidth_kbps: 2500,
            default_ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
            native_telephony: true,
            recent_calls: 16,
        }
    }
}

/// Engine configuration persisted as JSON under `"engine_config"`.
pub struct ConfigManager {
    store: Arc<dyn KvStore>,
}

impl ConfigManager {
    const KEY: &'static str = "engine_config";

    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Stored configuration, or defaults when nothing was saved yet.
    pub async fn load(&self) -> Result<EngineConfig, anyhow::Error> {
        match self.store.get(Self::KEY).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| anyhow!("Failed to parse engine config: {}", e)),
            None => Ok(EngineConfig::default()),
        }
    }

    pub async fn save(&self, config: &EngineConfig) -> Result<(), anyhow::Error> {
        let raw = serde_json::to_string(config)
            .map_err(|e| anyhow!("Failed to serialize engine config: {}", e))?;
        self.store.put(Self::KEY, raw).await
    }
}
