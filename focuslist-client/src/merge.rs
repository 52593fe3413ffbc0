//! Reconciliation of a fetched remote snapshot with local write history.
//!
//! The remote read may predate writes this client has already had
//! acknowledged (they sit in the mutation log) or has not pushed yet (they
//! sit in the queue). Both are laid over the snapshot so the result never
//! regresses the user's own recent writes.

use focuslist_core::{LogEntry, Mutation, MutationKind, QueuedMutation, Task, TaskId};

/// Builds the task list that replaces local state after a fetch.
///
/// * `fetched` - the remote snapshot, used as the base
/// * `log` - unexpired log entries, oldest first
/// * `pending` - mutations still in the queue, in FIFO order
/// * `in_flight` - local copies of tasks whose direct create or update call
///   has not returned yet
/// * `local` - the current in-memory list, used to recover the fullest
///   representation of provisional tasks
pub fn reconcile(
    fetched: Vec<Task>,
    log: &[(&str, &LogEntry)],
    pending: &[QueuedMutation],
    in_flight: &[Task],
    local: &[Task],
) -> Vec<Task> {
    let mut result = fetched;

    for (id, entry) in log {
        let id = TaskId::canonical(*id);
        match entry.kind {
            MutationKind::Add | MutationKind::Update => {
                let Some(item) = &entry.item else { continue };
                match position(&result, &id) {
                    // The read returned a pre-update snapshot.
                    Some(index) if entry.kind == MutationKind::Update => {
                        result[index] = item.clone();
                    }
                    Some(_) => {}
                    // The read missed a very recent write.
                    None => result.push(item.clone()),
                }
            }
            MutationKind::Delete => result.retain(|task| task.id != id),
        }
    }

    // The snapshot may predate these calls; keep the local side until they land.
    for task in in_flight {
        match position(&result, &task.id) {
            Some(index) => result[index].completed = task.completed,
            None if task.id.is_provisional() => result.push(task.clone()),
            None => {}
        }
    }

    for queued in pending {
        let target = &queued.target_id;
        match &queued.mutation {
            Mutation::Add { text, priority } => {
                if position(&result, target).is_none() {
                    let item = local
                        .iter()
                        .find(|task| &task.id == target)
                        .cloned()
                        .unwrap_or_else(|| Task {
                            id: target.clone(),
                            text: text.clone(),
                            priority: *priority,
                            completed: false,
                            created_at: queued.enqueued_at,
                        });
                    result.push(item);
                }
            }
            Mutation::Update { completed } => {
                if let Some(index) = position(&result, target) {
                    result[index].completed = *completed;
                }
            }
            Mutation::Delete => result.retain(|task| &task.id != target),
        }
    }

    // Same order the remote store lists in: newest first.
    result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    result
}

fn position(tasks: &[Task], id: &TaskId) -> Option<usize> {
    tasks.iter().position(|task| &task.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use focuslist_core::Priority;

    fn task(id: &str, minutes_ago: i64) -> Task {
        Task {
            id: TaskId::canonical(id),
            text: format!("task {}", id),
            priority: Priority::Medium,
            completed: false,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    fn ids(tasks: &[Task]) -> Vec<String> {
        tasks.iter().map(|task| task.id.to_string()).collect()
    }

    #[test]
    fn test_snapshot_passes_through_without_history() {
        let fetched = vec![task("b", 1), task("a", 2)];
        let merged = reconcile(fetched.clone(), &[], &[], &[], &[]);
        assert_eq!(merged, fetched);
    }

    #[test]
    fn test_logged_add_missing_from_snapshot_is_restored() {
        let added = task("new", 0);
        let entry = LogEntry::new(MutationKind::Add, Some(added.clone()));

        let merged = reconcile(vec![task("old", 5)], &[("new", &entry)], &[], &[], &[]);
        assert_eq!(ids(&merged), vec!["new", "old"]);
    }

    #[test]
    fn test_logged_update_replaces_stale_item() {
        let mut updated = task("a", 3);
        updated.completed = true;
        let entry = LogEntry::new(MutationKind::Update, Some(updated));

        let merged = reconcile(vec![task("a", 3)], &[("a", &entry)], &[], &[], &[]);
        assert!(merged[0].completed);
    }

    #[test]
    fn test_logged_add_does_not_override_present_item() {
        let mut server_copy = task("a", 3);
        server_copy.completed = true;
        let entry = LogEntry::new(MutationKind::Add, Some(task("a", 3)));

        let merged = reconcile(vec![server_copy], &[("a", &entry)], &[], &[], &[]);
        assert!(merged[0].completed);
    }

    #[test]
    fn test_logged_delete_suppresses_ghost() {
        let entry = LogEntry::new(MutationKind::Delete, None);
        let merged = reconcile(vec![task("a", 1), task("gone", 2)], &[("gone", &entry)], &[], &[], &[]);
        assert_eq!(ids(&merged), vec!["a"]);
    }

    #[test]
    fn test_pending_mutations_are_overlaid_in_order() {
        let provisional = TaskId::new_provisional();
        let mut local_copy = Task::provisional("Buy milk", Priority::Low);
        local_copy.id = provisional.clone();

        let pending = vec![
            QueuedMutation::new(
                provisional.clone(),
                Mutation::Add {
                    text: "Buy milk".to_string(),
                    priority: Priority::Low,
                },
            ),
            QueuedMutation::new(TaskId::canonical("a"), Mutation::Update { completed: true }),
            QueuedMutation::new(TaskId::canonical("b"), Mutation::Delete),
        ];

        let merged = reconcile(
            vec![task("a", 1), task("b", 2)],
            &[],
            &pending,
            &[],
            std::slice::from_ref(&local_copy),
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], local_copy);
        assert!(merged[1].completed);
    }

    #[test]
    fn test_queued_add_without_local_copy_uses_payload() {
        let provisional = TaskId::new_provisional();
        let pending = vec![QueuedMutation::new(
            provisional.clone(),
            Mutation::Add {
                text: "Call mom".to_string(),
                priority: Priority::High,
            },
        )];

        let merged = reconcile(Vec::new(), &[], &pending, &[], &[]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, provisional);
        assert_eq!(merged[0].text, "Call mom");
        assert_eq!(merged[0].priority, Priority::High);
    }

    #[test]
    fn test_in_flight_writes_survive_stale_snapshot() {
        let creating = Task::provisional("Draft", Priority::Medium);
        let mut toggled = task("a", 1);
        toggled.completed = true;
        let mut elsewhere = task("gone", 2);
        elsewhere.completed = true;

        let merged = reconcile(
            vec![task("a", 1)],
            &[],
            &[],
            &[creating.clone(), toggled, elsewhere],
            &[],
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], creating);
        assert!(merged[1].completed);
    }
}
