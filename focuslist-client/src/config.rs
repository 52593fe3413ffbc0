use std::sync::Arc;
use std::time::Duration;

use crate::errors::ClientError;
use crate::remote::{HttpTaskStore, RemoteTaskStore};
use crate::ClientResult;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://focuslist.db";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote task store. `None` runs in guest mode.
    pub server_url: Option<String>,
    pub database_url: String,
    pub session_token: Option<String>,
    /// How long acknowledged writes are overlaid on fetched snapshots.
    pub log_retention: Duration,
    /// Minimum quiet period after a drain before a refresh may run.
    pub refresh_cooldown: Duration,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    /// Queue length past which a warning is raised. Writes are never dropped.
    pub max_pending_mutations: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            session_token: None,
            log_retention: Duration::from_secs(60),
            refresh_cooldown: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            max_pending_mutations: 500,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let seconds = |key: &str, default: Duration| -> ClientResult<Duration> {
            match non_empty(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ClientError::Config(format!("{} must be a number of seconds, got '{}'", key, raw))),
                None => Ok(default),
            }
        };

        let max_pending_mutations = match non_empty("FOCUSLIST_MAX_PENDING") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                ClientError::Config(format!("FOCUSLIST_MAX_PENDING must be a count, got '{}'", raw))
            })?,
            None => defaults.max_pending_mutations,
        };

        Ok(Self {
            server_url: non_empty("FOCUSLIST_SERVER_URL"),
            database_url: non_empty("FOCUSLIST_DATABASE_URL").unwrap_or(defaults.database_url),
            session_token: non_empty("FOCUSLIST_SESSION_TOKEN"),
            log_retention: seconds("FOCUSLIST_LOG_RETENTION_SECS", defaults.log_retention)?,
            refresh_cooldown: seconds("FOCUSLIST_REFRESH_COOLDOWN_SECS", defaults.refresh_cooldown)?,
            refresh_interval: seconds("FOCUSLIST_REFRESH_INTERVAL_SECS", defaults.refresh_interval)?,
            request_timeout: seconds("FOCUSLIST_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            max_pending_mutations,
        })
    }

    /// The HTTP remote for `server_url`, or `None` in guest mode.
    pub fn build_remote(&self) -> ClientResult<Option<Arc<dyn RemoteTaskStore>>> {
        match &self.server_url {
            Some(url) => {
                let store =
                    HttpTaskStore::new(url, self.session_token.clone(), self.request_timeout)?;
                Ok(Some(Arc::new(store)))
            }
            None => Ok(None),
        }
    }
}
