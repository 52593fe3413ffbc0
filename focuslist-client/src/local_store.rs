use focuslist_core::{LogEntry, QueuedMutation, Task};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::database::KeyValueStore;

pub const TASKS_KEY: &str = "tasks";
pub const QUEUE_KEY: &str = "pending-mutations";
pub const LOG_KEY: &str = "mutation-log";

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T: ?Sized> {
    schema_version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    schema_version: u32,
    data: T,
}

/// The three persisted documents (task list, pending mutations and the
/// mutation log) on top of a key-value backend.
///
/// Storage failures never reach callers. A failed read or write is logged
/// and the store stops touching the backend for the rest of the session, so
/// the engine keeps working purely in memory.
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn KeyValueStore>,
    degraded: Arc<AtomicBool>,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn degrade(&self) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::error!("Durable store unavailable, continuing in memory for this session");
        }
    }

    pub async fn load_document<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if self.is_degraded() {
            return None;
        }

        let raw = match self.backend.load(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("Failed to read '{}' from durable store: {}", key, e);
                self.degrade();
                return None;
            }
        };

        match serde_json::from_str::<Envelope<T>>(&raw) {
            Ok(envelope) if envelope.schema_version == SCHEMA_VERSION => Some(envelope.data),
            Ok(envelope) => {
                tracing::warn!(
                    "Ignoring '{}' with unsupported schema version {}",
                    key,
                    envelope.schema_version
                );
                None
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable '{}' document: {}", key, e);
                None
            }
        }
    }

    pub async fn save_document<T: Serialize + ?Sized>(&self, key: &str, data: &T) {
        if self.is_degraded() {
            tracing::debug!("Skipping write of '{}' in degraded mode", key);
            return;
        }

        let raw = match serde_json::to_string(&EnvelopeRef {
            schema_version: SCHEMA_VERSION,
            data,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Failed to serialize '{}': {}", key, e);
                return;
            }
        };

        if let Err(e) = self.backend.save(key, &raw).await {
            tracing::error!("Failed to write '{}' to durable store: {}", key, e);
            self.degrade();
        }
    }

    pub async fn load_tasks(&self) -> Vec<Task> {
        self.load_document(TASKS_KEY).await.unwrap_or_default()
    }

    pub async fn save_tasks(&self, tasks: &[Task]) {
        self.save_document(TASKS_KEY, tasks).await;
    }

    pub async fn load_queue(&self) -> Vec<QueuedMutation> {
        self.load_document(QUEUE_KEY).await.unwrap_or_default()
    }

    pub async fn save_queue(&self, queue: &[QueuedMutation]) {
        self.save_document(QUEUE_KEY, queue).await;
    }

    /// The log is stored as ordered `(id, entry)` pairs.
    pub async fn load_log(&self) -> Vec<(String, LogEntry)> {
        self.load_document(LOG_KEY).await.unwrap_or_default()
    }

    pub async fn save_log(&self, entries: &[(String, LogEntry)]) {
        self.save_document(LOG_KEY, entries).await;
    }
}
