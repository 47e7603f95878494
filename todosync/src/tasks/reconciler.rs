//! The single writer of the in-memory task list.
//!
//! `Reconciler` holds the current user's tasks and applies two kinds of
//! input to them:
//!
//! - **Local commands** (`apply_local_*`) validate the request against the
//!   list and the session, then issue a remote write. They never touch the
//!   list, so a failed write needs no rollback.
//! - **Remote notifications** ([`Reconciler::apply_remote_notification`])
//!   are the only path that mutates the list, whether the change was made
//!   here or elsewhere.
//!
//! Because the feed echoes every committed write, this keeps the list
//! convergent with the table without correlating writes to notifications.

use std::time::Duration;

use todosync_proto::change::ChangeNotification;
use todosync_proto::task::{
    MAX_TASK_TITLE_LENGTH, NewTask, Task, TaskDraft, TaskFilter, TaskId, TaskPatch, UserId,
    validate_title,
};

use super::ReconcileError;
use super::list::{FilteredView, TaskList};
use crate::backend::{StoreError, TaskStore};

/// Default upper bound on a single store round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What a successful save asked the store to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new row was inserted with this id.
    Created(TaskId),
    /// The existing row was updated.
    Updated(TaskId),
}

/// Whether a notification changed the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The list changed.
    Applied,
    /// The list is unchanged.
    Discarded(DiscardReason),
}

/// Why a notification left the list unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Nobody is signed in.
    NoSession,
    /// The row belongs to another user.
    ForeignOwner,
    /// An insert for an id already in the list.
    Duplicate,
    /// An update or delete for an id not in the list.
    UnknownTask,
}

fn discard(notification: &ChangeNotification, reason: DiscardReason) -> NotificationOutcome {
    tracing::debug!(
        kind = %notification.kind(),
        task = %notification.task_id(),
        ?reason,
        "notification discarded"
    );
    NotificationOutcome::Discarded(reason)
}

/// Owner of the in-memory task list for the signed-in user.
pub struct Reconciler<S: TaskStore> {
    store: S,
    list: TaskList,
    user: Option<UserId>,
    seeded: bool,
    max_title_len: usize,
    request_timeout: Duration,
}

impl<S: TaskStore> Reconciler<S> {
    /// Creates a reconciler with no session and an empty, unseeded list.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
            list: TaskList::new(),
            user: None,
            seeded: false,
            max_title_len: MAX_TASK_TITLE_LENGTH,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the maximum title length in characters.
    #[must_use]
    pub fn with_max_title_len(mut self, max_title_len: usize) -> Self {
        self.max_title_len = max_title_len;
        self
    }

    /// Sets the timeout applied to every store call.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The store this reconciler writes to.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The signed-in user, if any.
    #[must_use]
    pub const fn current_user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Whether the list has been seeded for the current session.
    #[must_use]
    pub const fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Switches to a new session.
    ///
    /// The list is cleared and marked unseeded even when `user` is the
    /// same as before; the caller follows up with [`load`](Self::load).
    pub fn set_user(&mut self, user: Option<UserId>) {
        tracing::info!(
            user = user.as_ref().map_or("<none>", UserId::as_str),
            "session changed"
        );
        self.user = user;
        self.list.clear();
        self.seeded = false;
    }

    /// Replaces the whole list with `tasks`.
    ///
    /// Rows owned by anyone but the current user are dropped. With no
    /// session the list ends up empty.
    pub fn seed(&mut self, tasks: Vec<Task>) {
        let owned: Vec<Task> = match &self.user {
            Some(user) => tasks.into_iter().filter(|t| &t.owner == user).collect(),
            None => Vec::new(),
        };
        self.list.replace_all(owned);
        self.seeded = true;
        tracing::info!(count = self.list.len(), "task list seeded");
    }

    /// Bulk-reads the current user's tasks and seeds the list.
    ///
    /// Returns the number of tasks loaded.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::NoSession`] without a user, or
    /// [`ReconcileError::RemoteRead`] if the read fails, in which case the
    /// list is left empty and unseeded.
    pub async fn load(&mut self) -> Result<usize, ReconcileError> {
        let user = self.user.clone().ok_or(ReconcileError::NoSession)?;
        let tasks = self
            .remote(self.store.list_by_owner(&user))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "initial task read failed");
                ReconcileError::RemoteRead(e)
            })?;
        self.seed(tasks);
        Ok(self.list.len())
    }

    /// Asks the store to flip a task's completion flag.
    ///
    /// Returns `Ok(false)` without a remote call if the id is not in the
    /// list. The list itself changes only when the update is echoed back.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::NoSession`], [`ReconcileError::Unauthorized`] for a
    /// task owned by someone else, or [`ReconcileError::RemoteWrite`].
    pub async fn apply_local_toggle(&self, id: &TaskId) -> Result<bool, ReconcileError> {
        let Some(task) = self.owned_task(id)? else {
            tracing::debug!(task = %id, "toggle for unknown task ignored");
            return Ok(false);
        };
        let patch = TaskPatch::completed(!task.completed);
        self.write(self.store.update(id, &patch)).await?;
        tracing::debug!(task = %id, completed = !task.completed, "toggle sent");
        Ok(true)
    }

    /// Asks the store to delete a task.
    ///
    /// Returns `Ok(false)` without a remote call if the id is not in the
    /// list. The entry is removed when the delete is echoed back.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::NoSession`], [`ReconcileError::Unauthorized`] for a
    /// task owned by someone else, or [`ReconcileError::RemoteWrite`].
    pub async fn apply_local_delete(&self, id: &TaskId) -> Result<bool, ReconcileError> {
        if self.owned_task(id)?.is_none() {
            tracing::debug!(task = %id, "delete for unknown task ignored");
            return Ok(false);
        }
        self.write(self.store.delete(id)).await?;
        tracing::debug!(task = %id, "delete sent");
        Ok(true)
    }

    /// Saves a draft: updates the task named by `draft.id`, or inserts a
    /// new task owned by the current user when there is no id.
    ///
    /// # Errors
    ///
    /// Checked before any remote call: [`ReconcileError::NoSession`],
    /// [`ReconcileError::InvalidTitle`], [`ReconcileError::UnknownTask`]
    /// for an id not in the list, [`ReconcileError::Unauthorized`] for a
    /// task owned by someone else. Afterwards:
    /// [`ReconcileError::RemoteWrite`].
    pub async fn apply_local_save(&self, draft: &TaskDraft) -> Result<SaveOutcome, ReconcileError> {
        let user = self.user.as_ref().ok_or(ReconcileError::NoSession)?;
        validate_title(&draft.title, self.max_title_len)?;

        if let Some(id) = &draft.id {
            if self.owned_task(id)?.is_none() {
                return Err(ReconcileError::UnknownTask(id.clone()));
            }
            self.write(self.store.update(id, &draft.to_patch())).await?;
            tracing::debug!(task = %id, "update sent");
            return Ok(SaveOutcome::Updated(id.clone()));
        }

        let new_task = NewTask {
            owner: user.clone(),
            title: draft.title.clone(),
            completed: false,
            due_date: draft.due_date,
            priority: draft.priority,
        };
        let id = self.write(self.store.insert(&new_task)).await?;
        tracing::debug!(task = %id, "insert sent");
        Ok(SaveOutcome::Created(id))
    }

    /// Applies a change reported by the feed. This is the only operation
    /// that mutates the list.
    ///
    /// Rows of other owners and references to unknown ids are ignored; a
    /// delete without owner information is matched by id alone.
    pub fn apply_remote_notification(
        &mut self,
        notification: &ChangeNotification,
    ) -> NotificationOutcome {
        let Some(user) = &self.user else {
            return discard(notification, DiscardReason::NoSession);
        };
        if notification.owner().is_some_and(|owner| owner != user) {
            return discard(notification, DiscardReason::ForeignOwner);
        }

        let changed = match notification {
            ChangeNotification::Inserted(task) => {
                if !self.list.insert(task.clone()) {
                    return discard(notification, DiscardReason::Duplicate);
                }
                true
            }
            ChangeNotification::Updated(task) => self.list.update(task.clone()),
            ChangeNotification::Deleted(row) => self.list.remove(&row.id).is_some(),
        };

        if changed {
            tracing::debug!(
                kind = %notification.kind(),
                task = %notification.task_id(),
                "notification applied"
            );
            NotificationOutcome::Applied
        } else {
            discard(notification, DiscardReason::UnknownTask)
        }
    }

    /// Lazy view of the tasks matching `filter`, newest first.
    pub fn filtered_view(&self, filter: TaskFilter) -> FilteredView<'_> {
        self.list.filtered(filter)
    }

    /// The current list, newest first.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        self.list.as_slice()
    }

    /// An owned copy of the current list for handing to readers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Task> {
        self.list.as_slice().to_vec()
    }

    /// Looks up a task in the list.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.list.get(id)
    }

    /// The listed task with `id`, if the current user owns it.
    fn owned_task(&self, id: &TaskId) -> Result<Option<&Task>, ReconcileError> {
        let user = self.user.as_ref().ok_or(ReconcileError::NoSession)?;
        match self.list.get(id) {
            Some(task) if &task.owner != user => {
                Err(ReconcileError::Unauthorized { id: id.clone() })
            }
            found => Ok(found),
        }
    }

    async fn write<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, ReconcileError> {
        self.remote(call).await.map_err(|e| {
            tracing::warn!(error = %e, "remote write failed");
            ReconcileError::RemoteWrite(e)
        })
    }

    async fn remote<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}
