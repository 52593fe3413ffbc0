//! Notifications for the UI layer.
//!
//! Callbacks are invoked synchronously on the task that produced the event,
//! so they should return quickly and must not block.

use focuslist_core::{SyncState, TaskId};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TaskAdded,
    TaskUpdated,
    TaskRemoved,
    TaskIdAssigned,
    StateChanged,
    SyncStarted,
    SyncCompleted,
    SyncError,
    QueueLimitExceeded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    TaskAdded { id: TaskId },
    TaskUpdated { id: TaskId, completed: bool },
    TaskRemoved { id: TaskId },
    /// The remote store acknowledged a locally created task.
    TaskIdAssigned { provisional: TaskId, canonical: TaskId },
    StateChanged { state: SyncState },
    SyncStarted { pending: usize },
    SyncCompleted { processed: usize, remaining: usize },
    SyncError { message: String },
    QueueLimitExceeded { pending: usize },
}

impl SyncEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            SyncEvent::TaskAdded { .. } => EventType::TaskAdded,
            SyncEvent::TaskUpdated { .. } => EventType::TaskUpdated,
            SyncEvent::TaskRemoved { .. } => EventType::TaskRemoved,
            SyncEvent::TaskIdAssigned { .. } => EventType::TaskIdAssigned,
            SyncEvent::StateChanged { .. } => EventType::StateChanged,
            SyncEvent::SyncStarted { .. } => EventType::SyncStarted,
            SyncEvent::SyncCompleted { .. } => EventType::SyncCompleted,
            SyncEvent::SyncError { .. } => EventType::SyncError,
            SyncEvent::QueueLimitExceeded { .. } => EventType::QueueLimitExceeded,
        }
    }
}

type Callback = Box<dyn Fn(&SyncEvent) + Send + Sync>;

struct CallbackEntry {
    callback: Callback,
    event_filter: Option<EventType>,
}

pub struct EventDispatcher {
    callbacks: Mutex<Vec<CallbackEntry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.register(Box::new(callback), None);
    }

    /// Register a callback that only receives events of `event_filter`'s type
    pub fn register_callback_filtered<F>(&self, callback: F, event_filter: EventType)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.register(Box::new(callback), Some(event_filter));
    }

    fn register(&self, callback: Callback, event_filter: Option<EventType>) {
        match self.callbacks.lock() {
            Ok(mut callbacks) => callbacks.push(CallbackEntry {
                callback,
                event_filter,
            }),
            Err(_) => tracing::error!("Failed to acquire callback lock for registration"),
        }
    }

    pub fn emit(&self, event: SyncEvent) {
        let callbacks = match self.callbacks.lock() {
            Ok(callbacks) => callbacks,
            Err(_) => {
                tracing::error!("Failed to acquire callback lock for event emission");
                return;
            }
        };

        let event_type = event.event_type();
        for entry in callbacks.iter() {
            if let Some(filter) = entry.event_filter {
                if filter != event_type {
                    continue;
                }
            }
            (entry.callback)(&event);
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
