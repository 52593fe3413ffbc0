//! FocusList - Offline-first task list synchronization
//!
//! This crate provides a unified API for the FocusList sync engine.
//!
//! # Example
//!
//! ```ignore
//! use focuslist::{NetworkMonitor, Priority, SqliteStore, SyncConfig, SyncEngine};
//!
//! let config = SyncConfig::from_env()?;
//! let store = SqliteStore::open(&config.database_url).await?;
//! let (monitor, signals) = NetworkMonitor::new(true);
//! let engine = SyncEngine::new(config.clone(), Arc::new(store), config.build_remote()?, monitor).await;
//! engine.clone().spawn(signals);
//! engine.add_task("Write report", Priority::High).await;
//! ```

// Re-export client types
pub use focuslist_client::{
    ClientError, ClientResult, DrainOutcome, EventType, HttpTaskStore, KeyValueStore,
    MemoryStore, NetworkMonitor, NetworkSignal, RefreshOutcome, RemoteTaskStore, SqliteStore,
    SyncConfig, SyncEngine, SyncEvent,
};

// Re-export core types that external applications may need
pub use focuslist_core::errors::{FailureClass, SyncError};
pub use focuslist_core::models::{Priority, SyncState, Task, TaskId};
pub use focuslist_core::SyncResult;
