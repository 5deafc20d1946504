use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::KvStore;

/// Process-local store, for loopback runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), anyhow::Error> {
        self.values.lock().insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), anyhow::Error> {
        self.values.lock().remove(key);
        Ok(())
    }
}
