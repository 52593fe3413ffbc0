use chrono::{DateTime, Utc};
use focuslist_core::LogEntry;
use std::collections::HashMap;
use std::time::Duration;

use crate::local_store::LocalStore;

/// Recently acknowledged writes, keyed by canonical id.
///
/// Entries are only recorded after the remote store confirmed the write and
/// only live for the retention window. Merges use them to keep a stale
/// server read from undoing what this client just did.
pub struct MutationLog {
    entries: HashMap<String, LogEntry>,
    retention: Duration,
    store: LocalStore,
}

impl MutationLog {
    pub async fn load(store: LocalStore, retention: Duration) -> Self {
        let entries = store.load_log().await.into_iter().collect();
        Self {
            entries,
            retention,
            store,
        }
    }

    /// Stores `entry` for `id`, replacing whatever was logged before.
    pub async fn record(&mut self, id: &str, entry: LogEntry) {
        tracing::debug!("Logging acknowledged {} for {}", entry.kind, id);
        self.entries.insert(id.to_string(), entry);
        self.persist().await;
    }

    /// Drops entries older than the retention window.
    pub async fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.retention;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            now.signed_duration_since(entry.timestamp)
                .to_std()
                .map(|age| age <= retention)
                // Timestamps ahead of `now` are kept.
                .unwrap_or(true)
        });
        let pruned = before - self.entries.len();
        if pruned > 0 {
            tracing::debug!("Pruned {} expired log entries", pruned);
            self.persist().await;
        }
        pruned
    }

    pub fn get(&self, id: &str) -> Option<&LogEntry> {
        self.entries.get(id)
    }

    /// Entries ordered by the time they were acknowledged.
    pub fn entries_oldest_first(&self) -> Vec<(&str, &LogEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(id, entry)| (id.as_str(), entry))
            .collect();
        entries.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(b.0)));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn persist(&self) {
        let pairs: Vec<(String, LogEntry)> = self
            .entries_oldest_first()
            .into_iter()
            .map(|(id, entry)| (id.to_string(), entry.clone()))
            .collect();
        self.store.save_log(&pairs).await;
    }
}
