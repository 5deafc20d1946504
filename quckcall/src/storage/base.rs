use std::path::{Path, PathBuf};

use anyhow::anyhow;
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use rand::RngCore as _;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use tokio_sqlite::{Connection, Value};

use super::KvStore;

/// Durable key-value store on an SQLCipher database.
///
/// The database key is derived with Argon2id from a passphrase shared with
/// the background call handler; the salt lives next to the database in
/// `meta.json`. Both processes open the same directory.
pub struct SqliteStore {
    path: PathBuf,
    connection: TokioMutex<Connection>,
}

impl SqliteStore {
    const META_FILE: &'static str = "meta.json";
    const DATA_FILE: &'static str = "calls.db";

    /// Open the store in `path`, creating it on first use.
    pub async fn open(path: &Path, passphrase: &str) -> Result<Self, anyhow::Error> {
        Self::validate_passphrase(passphrase)?;
        tokio::fs::create_dir_all(path).await?;
        let meta_path = path.join(Self::META_FILE);
        let meta = match tokio::fs::try_exists(&meta_path).await? {
            true => Self::load_meta(&meta_path).await?,
            false => {
                let meta = Meta::generate();
                drop(tokio::fs::remove_file(path.join(Self::DATA_FILE)).await);
                Self::write_meta(&meta_path, &meta).await?;
                tracing::info!(path = %path.display(), "Created call store");
                meta
            }
        };
        let key = Self::derive_key(&meta, passphrase)?;
        let mut connection = Connection::open(path.join(Self::DATA_FILE)).await?;
        Self::key_connection(&mut connection, &key).await?;
        Self::ensure_tables(&mut connection).await?;
        Ok(Self {
            path: path.to_owned(),
            connection: TokioMutex::new(connection),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_tables(connection: &mut Connection) -> Result<(), anyhow::Error> {
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS \"kv\" (
                    \"key\" TEXT PRIMARY KEY NOT NULL,
                    \"value\" TEXT NOT NULL
                )",
                Vec::<Value>::new(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create kv table: {}", e))?;
        Ok(())
    }

    async fn load_meta(path: &Path) -> Result<Meta, anyhow::Error> {
        let data = tokio::fs::read_to_string(path).await?;
        let meta = serde_json::from_str(&data)?;
        Ok(meta)
    }

    async fn write_meta(path: &Path, meta: &Meta) -> Result<(), anyhow::Error> {
        let data = serde_json::to_string_pretty(meta)?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn key_connection(connection: &mut Connection, key: &[u8]) -> Result<(), anyhow::Error> {
        let hex_key = hex::encode(key).to_uppercase();
        let pragma_key = format!("PRAGMA key = \"x'{}'\"", hex_key);
        connection.query(pragma_key, Vec::<Value>::new()).await?;
        Ok(())
    }

    fn derive_key(meta: &Meta, passphrase: &str) -> Result<Vec<u8>, anyhow::Error> {
        match meta.hash {
            Hash::Argon2id {
                m_cost,
                t_cost,
                p_cost,
            } => {
                let salt = BASE64_STANDARD
                    .decode(&meta.salt)
                    .map_err(|err| anyhow!("Corrupted salt in store metadata: {err}"))?;
                let params = Params::new(m_cost, t_cost, p_cost, Some(32))
                    .map_err(|err| anyhow!("Incorrect Argon2id params: {err}"))?;
                let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
                let mut hash = [0u8; 32];
                argon
                    .hash_password_into(passphrase.as_bytes(), &salt, &mut hash)
                    .map_err(|err| anyhow!("Failed to hash passphrase with Argon2id: {err}"))?;
                Ok(hash.to_vec())
            }
        }
    }

    fn validate_passphrase(passphrase: &str) -> Result<(), anyhow::Error> {
        if passphrase.len() < 4 {
            return Err(anyhow!("Passphrase is too short"));
        }
        if passphrase.len() > 64 {
            return Err(anyhow!("Passphrase is too long"));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut connection = self.connection.lock().await;
        let row = connection
            .query_row(
                "SELECT \"value\" FROM \"kv\" WHERE \"key\" = ?1 LIMIT 1",
                vec![Value::Text(key.to_string())],
            )
            .await
            .map_err(|e| anyhow!("Failed to read '{}': {}", key, e))?;
        match row {
            Some(row) => match row.into_values().pop() {
                Some(Value::Text(s)) => Ok(Some(s)),
                Some(other) => Err(anyhow!("Unexpected value type: {:?}", other)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<(), anyhow::Error> {
        let mut connection = self.connection.lock().await;
        connection
            .execute(
                "INSERT INTO \"kv\" (\"key\", \"value\") VALUES (?1, ?2)
                 ON CONFLICT(\"key\") DO UPDATE SET \"value\" = excluded.\"value\"",
                vec![Value::Text(key.to_string()), Value::Text(value)],
            )
            .await
            .map_err(|e| anyhow!("Failed to write '{}': {}", key, e))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut connection = self.connection.lock().await;
        connection
            .execute(
                "DELETE FROM \"kv\" WHERE \"key\" = ?1",
                vec![Value::Text(key.to_string())],
            )
            .await
            .map_err(|e| anyhow!("Failed to remove '{}': {}", key, e))?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Meta {
    hash: Hash,
    salt: String,
}

impl Meta {
    fn generate() -> Self {
        let mut salt = vec![0u8; 16];
        OsRng.fill_bytes(&mut salt);
        Self {
            hash: Hash::Argon2id {
                m_cost: 19 * 1024,
                t_cost: 2,
                p_cost: 1,
            },
            salt: BASE64_STANDARD.encode(salt),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum Hash {
    Argon2id {
        m_cost: u32,
        t_cost: u32,
        p_cost: u32,
    },
}
