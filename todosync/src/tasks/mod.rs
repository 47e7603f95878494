//! Personal task list kept convergent with the remote task table.
//!
//! [`TaskList`] is the ordered collection; [`Reconciler`] owns it and is the
//! only place it is mutated. Local commands only issue remote writes; the
//! list changes when the change feed reports the committed row.

pub mod list;
pub mod reconciler;

pub use list::{FilteredView, TaskList};
pub use reconciler::{DiscardReason, NotificationOutcome, Reconciler, SaveOutcome};

use thiserror::Error;
use todosync_proto::task::{TaskId, TitleError};

use crate::backend::StoreError;

/// Errors surfaced by reconciler operations.
///
/// None of these leave a partial change behind: a rejected or failed
/// command never touches the list.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No user is signed in.
    #[error("no signed-in user")]
    NoSession,
    /// The task belongs to someone other than the current user.
    #[error("task {id} is not owned by the current user")]
    Unauthorized {
        /// The task the command targeted.
        id: TaskId,
    },
    /// An edit referenced a task that is not in the list.
    #[error("task not found: {0}")]
    UnknownTask(TaskId),
    /// The title failed validation.
    #[error(transparent)]
    InvalidTitle(#[from] TitleError),
    /// The task store rejected an insert, update or delete.
    #[error("remote write failed: {0}")]
    RemoteWrite(#[source] StoreError),
    /// The initial bulk read failed; the list stays unseeded.
    #[error("initial load failed: {0}")]
    RemoteRead(#[source] StoreError),
}
