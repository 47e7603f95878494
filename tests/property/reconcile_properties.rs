//! Property-based tests for the reconciler's list rules.
//!
//! Uses proptest to verify:
//! 1. Any sequence of own-owner notifications leaves the list equal to the
//!    reference table, ordered newest first.
//! 2. The completed and pending views partition the full list.
//! 3. Notifications for other owners never change the list.
//! 4. Updates and deletes for ids not in the list are no-ops.
//! 5. A save naming an id not in the list never reaches the store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use todosync::backend::memory::MemoryBackend;
use todosync::tasks::{NotificationOutcome, Reconciler};
use todosync_proto::change::{ChangeNotification, DeletedRow};
use todosync_proto::task::{Priority, Task, TaskDraft, TaskFilter, TaskId, UserId};

const ME: &str = "me";

fn created(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn reconciler() -> Reconciler<MemoryBackend> {
    let mut r = Reconciler::new(MemoryBackend::new());
    r.set_user(Some(UserId::new(ME)));
    r.seed(Vec::new());
    r
}

// --- Strategies ---

fn arb_priority() -> impl Strategy<Value = Option<Priority>> {
    prop_oneof![
        Just(None),
        Just(Some(Priority::Low)),
        Just(Some(Priority::Medium)),
        Just(Some(Priority::High)),
    ]
}

/// A task for one of a small pool of ids, so sequences collide often.
fn arb_task(owner: &'static str) -> impl Strategy<Value = Task> {
    (0u8..8, 0i64..1_000, "[a-z ]{1,16}", any::<bool>(), arb_priority()).prop_map(
        move |(id, secs, title, completed, priority)| Task {
            id: TaskId::new(format!("t{id}")),
            owner: UserId::new(owner),
            title,
            completed,
            created_at: created(secs),
            due_date: None,
            priority,
        },
    )
}

fn arb_notification(owner: &'static str) -> impl Strategy<Value = ChangeNotification> {
    prop_oneof![
        arb_task(owner).prop_map(ChangeNotification::Inserted),
        arb_task(owner).prop_map(ChangeNotification::Updated),
        (0u8..8, any::<bool>()).prop_map(move |(id, with_owner)| {
            ChangeNotification::Deleted(DeletedRow {
                id: TaskId::new(format!("t{id}")),
                owner: with_owner.then(|| UserId::new(owner)),
            })
        }),
    ]
}

/// Table state implied by the notifications: inserts only create, updates
/// only touch existing rows, deletes remove.
fn reference(notifications: &[ChangeNotification]) -> BTreeMap<TaskId, Task> {
    let mut table = BTreeMap::new();
    for n in notifications {
        match n {
            ChangeNotification::Inserted(task) => {
                table.entry(task.id.clone()).or_insert_with(|| task.clone());
            }
            ChangeNotification::Updated(task) => {
                if let Some(existing) = table.get_mut(&task.id) {
                    *existing = task.clone();
                }
            }
            ChangeNotification::Deleted(row) => {
                table.remove(&row.id);
            }
        }
    }
    table
}

proptest! {
    #[test]
    fn list_converges_to_reference(
        notifications in prop::collection::vec(arb_notification(ME), 0..40)
    ) {
        let mut r = reconciler();
        for n in &notifications {
            r.apply_remote_notification(n);
        }
        let expected = reference(&notifications);

        prop_assert_eq!(r.tasks().len(), expected.len());
        for task in r.tasks() {
            prop_assert_eq!(Some(task), expected.get(&task.id));
        }
        prop_assert!(r.tasks().windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[test]
    fn filters_partition_the_list(
        notifications in prop::collection::vec(arb_notification(ME), 0..40)
    ) {
        let mut r = reconciler();
        for n in &notifications {
            r.apply_remote_notification(n);
        }
        let done: Vec<&Task> = r.filtered_view(TaskFilter::Completed).collect();
        let open: Vec<&Task> = r.filtered_view(TaskFilter::Pending).collect();
        let all: Vec<&Task> = r.filtered_view(TaskFilter::All).collect();

        prop_assert!(done.iter().all(|t| t.completed));
        prop_assert!(open.iter().all(|t| !t.completed));
        prop_assert_eq!(done.len() + open.len(), all.len());
        prop_assert_eq!(all.len(), r.tasks().len());
    }

    #[test]
    fn foreign_notifications_change_nothing(
        mine in prop::collection::vec(arb_notification(ME), 0..20),
        foreign in prop::collection::vec(arb_notification("someone-else"), 0..20),
    ) {
        let mut r = reconciler();
        for n in &mine {
            r.apply_remote_notification(n);
        }
        let before = r.snapshot();
        for n in &foreign {
            // Ownerless deletes match by id and are covered elsewhere.
            if n.owner().is_none() {
                continue;
            }
            prop_assert_ne!(r.apply_remote_notification(n), NotificationOutcome::Applied);
        }
        prop_assert_eq!(r.snapshot(), before);
    }

    #[test]
    fn unknown_ids_are_noops(
        tasks in prop::collection::vec(arb_task(ME), 0..8),
        probe in arb_task(ME),
    ) {
        let mut r = reconciler();
        r.seed(tasks.into_iter().filter(|t| t.id != probe.id).collect());
        let before = r.snapshot();

        let update = ChangeNotification::Updated(probe.clone());
        let delete = ChangeNotification::Deleted(DeletedRow { id: probe.id.clone(), owner: None });
        prop_assert_ne!(r.apply_remote_notification(&update), NotificationOutcome::Applied);
        prop_assert_ne!(r.apply_remote_notification(&delete), NotificationOutcome::Applied);
        prop_assert_eq!(r.snapshot(), before);
    }

    #[test]
    fn save_for_unlisted_id_never_writes(id in "[a-z0-9]{1,12}", title in "[a-z]{1,20}") {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let backend = MemoryBackend::new();
        let mut r = Reconciler::new(backend.clone());
        r.set_user(Some(UserId::new(ME)));

        let mut draft = TaskDraft::create(title);
        draft.id = Some(TaskId::new(id));
        let result = runtime.block_on(r.apply_local_save(&draft));

        prop_assert!(result.is_err());
        prop_assert!(backend.writes().is_empty());
    }
}
