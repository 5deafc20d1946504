mod base;
mod memory;

use async_trait::async_trait;

pub use base::*;
pub use memory::*;

/// Durable key-value capability shared with the background call handler.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    /// Overwrites any previous value.
    async fn put(&self, key: &str, value: String) -> Result<(), anyhow::Error>;

    async fn remove(&self, key: &str) -> Result<(), anyhow::Error>;
}
