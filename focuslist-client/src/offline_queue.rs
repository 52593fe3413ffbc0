use focuslist_core::{MutationKind, QueuedMutation, TaskId};
use std::collections::HashSet;
use uuid::Uuid;

use crate::local_store::LocalStore;

/// Ordered, durable list of write intents the remote store has not yet
/// acknowledged. Every change is written through to the local store before
/// the call returns.
pub struct MutationQueue {
    items: Vec<QueuedMutation>,
    store: LocalStore,
    soft_limit: usize,
}

impl MutationQueue {
    pub async fn load(store: LocalStore, soft_limit: usize) -> Self {
        let items = store.load_queue().await;
        if !items.is_empty() {
            tracing::info!("Restored {} pending mutations", items.len());
        }
        Self {
            items,
            store,
            soft_limit,
        }
    }

    /// Appends a mutation. Returns `true` when the queue has grown past its
    /// soft limit; the mutation is kept either way.
    pub async fn enqueue(&mut self, mutation: QueuedMutation) -> bool {
        tracing::debug!(
            "Queueing {} for {} ({})",
            mutation.kind(),
            mutation.target_id,
            mutation.dedup_token
        );
        self.items.push(mutation);
        self.persist().await;
        self.over_limit()
    }

    /// Queues an Add ahead of any mutation that already targets its
    /// provisional id, so dependents enqueued while the Add was in flight
    /// still replay after it.
    pub async fn enqueue_before_dependents(&mut self, mutation: QueuedMutation) -> bool {
        let position = self
            .items
            .iter()
            .position(|queued| queued.target_id == mutation.target_id)
            .unwrap_or(self.items.len());
        self.items.insert(position, mutation);
        self.persist().await;
        self.over_limit()
    }

    /// Removes every mutation whose dedup token is in `tokens`, keeping the
    /// remaining ones in their original order.
    pub async fn dequeue_acknowledged(&mut self, tokens: &HashSet<Uuid>) -> usize {
        if tokens.is_empty() {
            return 0;
        }
        let before = self.items.len();
        self.items
            .retain(|queued| !tokens.contains(&queued.dedup_token));
        let removed = before - self.items.len();
        if removed > 0 {
            self.persist().await;
        }
        removed
    }

    /// Points every mutation aimed at `provisional` to its canonical id.
    pub async fn retarget(&mut self, provisional: Uuid, canonical: &str) -> usize {
        let from = TaskId::Provisional(provisional);
        let mut changed = 0;
        for queued in self
            .items
            .iter_mut()
            .filter(|queued| queued.target_id == from)
        {
            queued.target_id = TaskId::canonical(canonical);
            changed += 1;
        }
        if changed > 0 {
            self.persist().await;
        }
        changed
    }

    pub fn snapshot(&self) -> Vec<QueuedMutation> {
        self.items.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMutation> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn targets(&self, id: &TaskId) -> bool {
        self.items.iter().any(|queued| &queued.target_id == id)
    }

    pub fn has_pending(&self, id: &TaskId, kind: MutationKind) -> bool {
        self.items
            .iter()
            .any(|queued| &queued.target_id == id && queued.kind() == kind)
    }

    fn over_limit(&self) -> bool {
        self.items.len() > self.soft_limit
    }

    async fn persist(&self) {
        self.store.save_queue(&self.items).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use focuslist_core::{Mutation, Priority};
    use std::sync::Arc;

    fn add(target: &TaskId) -> QueuedMutation {
        QueuedMutation::new(
            target.clone(),
            Mutation::Add {
                text: "Buy milk".to_string(),
                priority: Priority::Low,
            },
        )
    }

    async fn empty_queue(limit: usize) -> (MutationQueue, LocalStore) {
        let store = LocalStore::new(Arc::new(MemoryStore::new()));
        (MutationQueue::load(store.clone(), limit).await, store)
    }

    #[tokio::test]
    async fn test_enqueue_is_fifo_and_durable() {
        let (mut queue, store) = empty_queue(10).await;
        let id = TaskId::canonical("abc");

        queue
            .enqueue(QueuedMutation::new(id.clone(), Mutation::Update { completed: true }))
            .await;
        queue.enqueue(QueuedMutation::new(id.clone(), Mutation::Delete)).await;

        let kinds: Vec<_> = queue.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec![MutationKind::Update, MutationKind::Delete]);

        let restored = MutationQueue::load(store, 10).await;
        assert_eq!(restored.snapshot(), queue.snapshot());
    }

    #[tokio::test]
    async fn test_partial_dequeue_keeps_order() {
        let (mut queue, _) = empty_queue(10).await;
        let mutations: Vec<_> = (0..5)
            .map(|i| QueuedMutation::new(TaskId::canonical(format!("t{}", i)), Mutation::Delete))
            .collect();
        for mutation in &mutations {
            queue.enqueue(mutation.clone()).await;
        }

        let acknowledged: HashSet<_> = mutations[..2].iter().map(|m| m.dedup_token).collect();
        assert_eq!(queue.dequeue_acknowledged(&acknowledged).await, 2);

        let remaining: Vec<_> = queue.iter().map(|m| m.target_id.to_string()).collect();
        assert_eq!(remaining, vec!["t2", "t3", "t4"]);
    }

    #[tokio::test]
    async fn test_retarget_rewrites_provisional_targets() {
        let (mut queue, _) = empty_queue(10).await;
        let provisional = TaskId::new_provisional();
        let token = provisional.as_provisional().unwrap();

        queue
            .enqueue(QueuedMutation::new(provisional.clone(), Mutation::Update { completed: true }))
            .await;
        queue
            .enqueue(QueuedMutation::new(TaskId::canonical("other"), Mutation::Delete))
            .await;

        assert_eq!(queue.retarget(token, "real-1").await, 1);
        assert!(queue.targets(&TaskId::canonical("real-1")));
        assert!(!queue.targets(&provisional));
    }

    #[tokio::test]
    async fn test_add_is_queued_ahead_of_its_dependents() {
        let (mut queue, _) = empty_queue(10).await;
        let provisional = TaskId::new_provisional();

        queue
            .enqueue(QueuedMutation::new(TaskId::canonical("x"), Mutation::Delete))
            .await;
        queue
            .enqueue(QueuedMutation::new(provisional.clone(), Mutation::Update { completed: true }))
            .await;
        queue.enqueue_before_dependents(add(&provisional)).await;

        let kinds: Vec<_> = queue.iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![MutationKind::Delete, MutationKind::Add, MutationKind::Update]
        );
        assert!(queue.has_pending(&provisional, MutationKind::Add));
    }

    #[tokio::test]
    async fn test_soft_limit_reports_but_keeps_writes() {
        let (mut queue, _) = empty_queue(1).await;
        assert!(!queue.enqueue(add(&TaskId::new_provisional())).await);
        assert!(queue.enqueue(add(&TaskId::new_provisional())).await);
        assert_eq!(queue.len(), 2);
    }
}
