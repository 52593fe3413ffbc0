use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use focuslist_client::{MemoryStore, NetworkMonitor, NetworkSignal, RemoteTaskStore, SyncConfig, SyncEngine};
use focuslist_core::{
    protocol::{CreateTaskRequest, UpdateTaskRequest},
    Priority, SyncError, SyncResult, Task, TaskId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Lets a test hold a remote call open until it decides to release it.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// In-memory remote task store with a call log, scripted failures and
/// gates on individual operations.
#[derive(Default)]
pub struct MockTaskStore {
    tasks: Mutex<Vec<Task>>,
    next_id: Mutex<u32>,
    calls: Mutex<Vec<String>>,
    call_counts: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<(&'static str, usize), SyncError>>,
    gates: Mutex<HashMap<&'static str, Arc<Gate>>>,
}

#[allow(dead_code)]
impl MockTaskStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a task as if another client had created it, returning its id.
    pub fn seed(&self, text: &str) -> TaskId {
        let id = self.allocate_id();
        let age = self.tasks.lock().unwrap().len() as i64;
        self.tasks.lock().unwrap().push(Task {
            id: id.clone(),
            text: text.to_string(),
            priority: Priority::Medium,
            completed: false,
            created_at: Utc::now() - ChronoDuration::minutes(10 - age),
        });
        id
    }

    /// Puts a task back without logging a call, simulating a stale replica.
    pub fn insert(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }

    pub fn remote_tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Makes the `nth` (1-based) call of `operation` fail with `error`.
    pub fn fail_on(&self, operation: &'static str, nth: usize, error: SyncError) {
        self.failures.lock().unwrap().insert((operation, nth), error);
    }

    pub fn gate(&self, operation: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().unwrap().insert(operation, gate.clone());
        gate
    }

    fn allocate_id(&self) -> TaskId {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        TaskId::canonical(format!("srv-{}", *next))
    }

    async fn begin(&self, operation: &'static str, call: String) -> SyncResult<()> {
        self.calls.lock().unwrap().push(call);
        let nth = {
            let mut counts = self.call_counts.lock().unwrap();
            let count = counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        let gate = self.gates.lock().unwrap().remove(operation);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        match self.failures.lock().unwrap().remove(&(operation, nth)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn not_found() -> SyncError {
    SyncError::RemoteStatus {
        status: 404,
        message: "Todo not found".to_string(),
    }
}

#[async_trait]
impl RemoteTaskStore for MockTaskStore {
    async fn create(&self, request: &CreateTaskRequest) -> SyncResult<Task> {
        self.begin("create", format!("create:{}", request.text)).await?;
        let task = Task {
            id: self.allocate_id(),
            text: request.text.clone(),
            priority: request.priority,
            completed: false,
            created_at: Utc::now(),
        };
        self.tasks.lock().unwrap().push(task.clone());
        Ok(task)
    }

    async fn update(&self, id: &str, request: &UpdateTaskRequest) -> SyncResult<()> {
        self.begin("update", format!("update:{}:{}", id, request.completed))
            .await?;
        let target = TaskId::canonical(id);
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|task| task.id == target)
            .ok_or_else(not_found)?;
        task.completed = request.completed;
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        self.begin("delete", format!("delete:{}", id)).await?;
        let target = TaskId::canonical(id);
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|task| task.id != target);
        if tasks.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<Task>> {
        // Snapshot before any gate so a held call returns stale data.
        let mut snapshot = self.remote_tasks();
        self.begin("list", "list".to_string()).await?;
        snapshot.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshot)
    }
}

#[allow(dead_code)]
pub fn test_config() -> SyncConfig {
    SyncConfig {
        server_url: Some("http://mock".to_string()),
        refresh_cooldown: Duration::ZERO,
        ..SyncConfig::default()
    }
}

#[allow(dead_code)]
pub struct TestEngine {
    pub engine: SyncEngine,
    pub monitor: NetworkMonitor,
    pub signals: mpsc::UnboundedReceiver<NetworkSignal>,
    pub backend: Arc<MemoryStore>,
}

/// An engine on a fresh in-memory backend talking to `remote`.
#[allow(dead_code)]
pub async fn setup_engine(
    config: SyncConfig,
    remote: Option<Arc<MockTaskStore>>,
    online: bool,
) -> TestEngine {
    setup_engine_with_backend(config, remote, online, Arc::new(MemoryStore::new())).await
}

#[allow(dead_code)]
pub async fn setup_engine_with_backend(
    config: SyncConfig,
    remote: Option<Arc<MockTaskStore>>,
    online: bool,
    backend: Arc<MemoryStore>,
) -> TestEngine {
    let (monitor, signals) = NetworkMonitor::new(online);
    let remote = remote.map(|mock| mock as Arc<dyn RemoteTaskStore>);
    let engine = SyncEngine::new(config, backend.clone(), remote, monitor.clone()).await;
    TestEngine {
        engine,
        monitor,
        signals,
        backend,
    }
}

/// Polls `check` until it holds or a second has passed.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
