pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod local_store;
pub mod merge;
pub mod mutation_log;
pub mod network;
pub mod offline_queue;
pub mod queries;
pub mod remote;
pub mod sync_engine;

pub use config::SyncConfig;
pub use database::{KeyValueStore, MemoryStore, SqliteStore};
pub use errors::ClientError;
pub use events::{EventDispatcher, EventType, SyncEvent};
pub use local_store::LocalStore;
pub use network::{NetworkMonitor, NetworkSignal};
pub use remote::{HttpTaskStore, RemoteTaskStore};
pub use sync_engine::{DrainOutcome, RefreshOutcome, SyncEngine};

pub type ClientResult<T> = Result<T, ClientError>;
