use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::errors::SyncError;

const PROVISIONAL_PREFIX: &str = "tmp-";

/// Identifier of a task, either client-generated or assigned by the remote store.
///
/// A task starts out `Provisional` when created locally and becomes
/// `Canonical` exactly once, when the remote store acknowledges its creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskId {
    Provisional(Uuid),
    Canonical(String),
}

impl TaskId {
    pub fn new_provisional() -> Self {
        TaskId::Provisional(Uuid::new_v4())
    }

    pub fn canonical(id: impl Into<String>) -> Self {
        TaskId::Canonical(id.into())
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, TaskId::Provisional(_))
    }

    pub fn as_canonical(&self) -> Option<&str> {
        match self {
            TaskId::Canonical(id) => Some(id),
            TaskId::Provisional(_) => None,
        }
    }

    pub fn as_provisional(&self) -> Option<Uuid> {
        match self {
            TaskId::Provisional(token) => Some(*token),
            TaskId::Canonical(_) => None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Provisional(token) => write!(f, "{}{}", PROVISIONAL_PREFIX, token),
            TaskId::Canonical(id) => f.write_str(id),
        }
    }
}

impl FromStr for TaskId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SyncError::InvalidOperation("empty task id".to_string()));
        }
        match s.strip_prefix(PROVISIONAL_PREFIX) {
            Some(token) => Ok(TaskId::Provisional(Uuid::parse_str(token)?)),
            None => Ok(TaskId::Canonical(s.to_string())),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    pub priority: Priority,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// A freshly created, not yet acknowledged task.
    pub fn provisional(text: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: TaskId::new_provisional(),
            text: text.into(),
            priority,
            completed: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MutationKind {
    Add,
    Update,
    Delete,
}

/// A write intent together with the payload the remote call needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    Add { text: String, priority: Priority },
    Update { completed: bool },
    Delete,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Add { .. } => MutationKind::Add,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::Delete => MutationKind::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub dedup_token: Uuid,
    pub target_id: TaskId,
    pub mutation: Mutation,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMutation {
    pub fn new(target_id: TaskId, mutation: Mutation) -> Self {
        Self {
            dedup_token: Uuid::new_v4(),
            target_id,
            mutation,
            enqueued_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.mutation.kind()
    }
}

/// A recently acknowledged write, keyed by canonical id in the mutation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: MutationKind,
    pub item: Option<Task>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(kind: MutationKind, item: Option<Task>) -> Self {
        Self {
            kind,
            item,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncState {
    /// No authenticated remote target; everything stays on this device.
    Local,
    Synced,
    Offline,
    Syncing,
}
