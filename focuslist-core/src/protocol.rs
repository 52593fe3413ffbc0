//! Wire types for the remote task store's REST contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Priority, Task, TaskId};

/// Path segments of the task collection, relative to the server URL. A
/// single task lives one segment below, under its canonical id.
pub const TASKS_SEGMENTS: [&str; 2] = ["api", "todos"];

/// A task as the remote store represents it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub completed: bool,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl From<RemoteTask> for Task {
    fn from(remote: RemoteTask) -> Self {
        Task {
            id: TaskId::Canonical(remote.id),
            text: remote.text,
            priority: remote.priority,
            completed: remote.completed,
            created_at: remote.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub text: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub todo: RemoteTask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    pub completed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    #[serde(alias = "items")]
    pub todos: Vec<RemoteTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
