//! Change-feed payloads.
//!
//! The hosted backend pushes one JSON object per committed row change:
//!
//! ```json
//! { "eventType": "UPDATE", "table": "todos", "new": { ... }, "old": { "id": "t1" } }
//! ```
//!
//! `INSERT` and `UPDATE` carry the full row in `new`. `DELETE` carries the
//! removed row in `old`, which may hold nothing but the primary key.
//! [`decode_row_change`] turns such a payload into a typed
//! [`ChangeNotification`]; [`encode_row_change`] produces one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId, UserId};

/// Which mutation a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A row was created.
    #[serde(rename = "INSERT")]
    Inserted,
    /// A row was modified.
    #[serde(rename = "UPDATE")]
    Updated,
    /// A row was removed.
    #[serde(rename = "DELETE")]
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// What the feed knows about a deleted row.
///
/// The owner is only present when the backend replicates full old rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRow {
    /// Identifier of the removed task.
    pub id: TaskId,
    /// Owner of the removed task, if the backend reported it.
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserId>,
}

/// A typed change notification for the task table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotification {
    /// A task was created.
    Inserted(Task),
    /// A task's mutable fields changed; carries the full new row.
    Updated(Task),
    /// A task was removed.
    Deleted(DeletedRow),
}

impl ChangeNotification {
    /// The kind of change.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Inserted(_) => ChangeKind::Inserted,
            Self::Updated(_) => ChangeKind::Updated,
            Self::Deleted(_) => ChangeKind::Deleted,
        }
    }

    /// The affected task's identifier.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Inserted(task) | Self::Updated(task) => &task.id,
            Self::Deleted(row) => &row.id,
        }
    }

    /// The affected task's owner, when known.
    #[must_use]
    pub const fn owner(&self) -> Option<&UserId> {
        match self {
            Self::Inserted(task) | Self::Updated(task) => Some(&task.owner),
            Self::Deleted(row) => row.owner.as_ref(),
        }
    }
}

/// A raw row-change payload as pushed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    /// `INSERT`, `UPDATE` or `DELETE`.
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    /// Source table name.
    #[serde(default)]
    pub table: String,
    /// Row after the change; an empty object for deletes.
    #[serde(default)]
    pub new: serde_json::Value,
    /// Row before the change; may be partial or empty.
    #[serde(default)]
    pub old: serde_json::Value,
}

/// Error type for change payload encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload or one of its rows is not valid JSON for the expected shape.
    #[error("malformed change payload: {0}")]
    Json(#[from] serde_json::Error),
    /// The row the event kind requires is absent.
    #[error("{kind} payload is missing its {side} row")]
    MissingRow {
        /// The event kind.
        kind: ChangeKind,
        /// `"new"` or `"old"`.
        side: &'static str,
    },
}

impl RowChange {
    /// Converts the raw payload into a typed notification.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingRow`] when the row the kind needs is
    /// null or empty, or [`CodecError::Json`] when it does not describe a task.
    pub fn into_notification(self) -> Result<ChangeNotification, CodecError> {
        match self.event_type {
            ChangeKind::Inserted => {
                Ok(ChangeNotification::Inserted(row(self.new, ChangeKind::Inserted, "new")?))
            }
            ChangeKind::Updated => {
                Ok(ChangeNotification::Updated(row(self.new, ChangeKind::Updated, "new")?))
            }
            ChangeKind::Deleted => {
                Ok(ChangeNotification::Deleted(row(self.old, ChangeKind::Deleted, "old")?))
            }
        }
    }

    /// Builds the raw payload for a notification on `table`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if a row cannot be serialized.
    pub fn from_notification(
        notification: &ChangeNotification,
        table: &str,
    ) -> Result<Self, CodecError> {
        let empty = || serde_json::Value::Object(serde_json::Map::new());
        let (new, old) = match notification {
            ChangeNotification::Inserted(task) => (serde_json::to_value(task)?, empty()),
            ChangeNotification::Updated(task) => {
                let old = serde_json::to_value(DeletedRow {
                    id: task.id.clone(),
                    owner: None,
                })?;
                (serde_json::to_value(task)?, old)
            }
            ChangeNotification::Deleted(deleted) => (empty(), serde_json::to_value(deleted)?),
        };
        Ok(Self {
            event_type: notification.kind(),
            table: table.to_string(),
            new,
            old,
        })
    }
}

fn row<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    kind: ChangeKind,
    side: &'static str,
) -> Result<T, CodecError> {
    let present = match &value {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => true,
    };
    if !present {
        return Err(CodecError::MissingRow { kind, side });
    }
    Ok(serde_json::from_value(value)?)
}

/// Decodes a JSON change payload into a typed notification.
///
/// # Errors
///
/// Returns [`CodecError`] if the payload is malformed or incomplete.
pub fn decode_row_change(payload: &str) -> Result<ChangeNotification, CodecError> {
    let raw: RowChange = serde_json::from_str(payload)?;
    raw.into_notification()
}

/// Encodes a notification as the JSON payload the backend would push.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_row_change(
    notification: &ChangeNotification,
    table: &str,
) -> Result<String, CodecError> {
    let raw = RowChange::from_notification(notification, table)?;
    Ok(serde_json::to_string(&raw)?)
}
