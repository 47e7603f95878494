//! Property-based tests for change-feed payload decoding.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never causes a panic in `decode_row_change`.
//! 2. Any notification survives encode → decode.
//! 3. Arbitrary JSON objects under a valid `eventType` fail cleanly.

#![allow(clippy::unwrap_used)]

use chrono::{NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use todosync_proto::change::{ChangeNotification, DeletedRow, decode_row_change, encode_row_change};
use todosync_proto::task::{Priority, Task, TaskId, UserId};

fn arb_task() -> impl Strategy<Value = Task> {
    (
        "[a-z0-9-]{1,36}",
        "[a-z0-9]{1,12}",
        "\\PC{1,64}",
        any::<bool>(),
        0i64..4_000_000_000,
        prop::option::of(0u32..3650),
        prop::option::of(prop_oneof![
            Just(Priority::Low),
            Just(Priority::Medium),
            Just(Priority::High)
        ]),
    )
        .prop_map(|(id, owner, title, completed, secs, due, priority)| Task {
            id: TaskId::new(id),
            owner: UserId::new(owner),
            title,
            completed,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            due_date: due.and_then(|days| {
                NaiveDate::from_ymd_opt(2020, 1, 1)
                    .and_then(|d| d.checked_add_days(chrono::Days::new(u64::from(days))))
            }),
            priority,
        })
}

fn arb_notification() -> impl Strategy<Value = ChangeNotification> {
    prop_oneof![
        arb_task().prop_map(ChangeNotification::Inserted),
        arb_task().prop_map(ChangeNotification::Updated),
        ("[a-z0-9-]{1,36}", prop::option::of("[a-z0-9]{1,12}")).prop_map(|(id, owner)| {
            ChangeNotification::Deleted(DeletedRow {
                id: TaskId::new(id),
                owner: owner.map(UserId::new),
            })
        }),
    ]
}

proptest! {
    #[test]
    fn arbitrary_text_never_panics(payload in "\\PC{0,256}") {
        let _ = decode_row_change(&payload);
    }

    #[test]
    fn notification_roundtrip(n in arb_notification()) {
        let payload = encode_row_change(&n, "todos").unwrap();
        prop_assert_eq!(decode_row_change(&payload).unwrap(), n);
    }

    #[test]
    fn junk_rows_are_rejected(
        kind in prop_oneof![Just("INSERT"), Just("UPDATE")],
        key in "[a-z]{1,8}",
        value in any::<i64>(),
    ) {
        let payload = format!(r#"{{"eventType":"{kind}","new":{{"{key}":{value}}}}}"#);
        prop_assert!(decode_row_change(&payload).is_err());
    }
}
