use async_trait::async_trait;
use focuslist_core::SyncError;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use crate::queries::Queries;
use crate::ClientResult;

/// Durable string dictionary the engine persists its documents into.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn load(&self, key: &str) -> ClientResult<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> ClientResult<()>;
}

pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> ClientResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // A single connection keeps `sqlite::memory:` from splitting into
        // several independent databases.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Connects and brings the schema up to date.
    pub async fn open(database_url: &str) -> ClientResult<Self> {
        let store = Self::new(database_url).await?;
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn run_migrations(&self) -> ClientResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn load(&self, key: &str) -> ClientResult<Option<String>> {
        let row = sqlx::query(Queries::LOAD_VALUE)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn save(&self, key: &str, value: &str) -> ClientResult<()> {
        sqlx::query(Queries::UPSERT_VALUE)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Process-local store used for guest sessions and tests.
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
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> ClientResult<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| SyncError::StorageError("memory store lock poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> ClientResult<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| SyncError::StorageError("memory store lock poisoned".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
