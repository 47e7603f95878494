//! In-process backend for tests and the offline demo.
//!
//! [`MemoryBackend`] implements both [`TaskStore`] and [`ChangeFeed`] over a
//! shared row map: every committed write is encoded as the JSON payload the
//! hosted backend would push and fanned out to all subscribers. Failures,
//! held-back notifications and dropped feeds can be injected to exercise the
//! reconciler's error paths. [`MemorySession`] is a settable session.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use todosync_proto::change::{ChangeNotification, DeletedRow, encode_row_change};
use todosync_proto::task::{NewTask, Task, TaskId, TaskPatch, UserId};

use super::{
    ChangeFeed, FeedError, SessionError, SessionProvider, StoreError, Subscription,
    SubscriptionId, TaskStore,
};

/// Default table name served by the in-memory feed.
pub const DEFAULT_TABLE: &str = "todos";

/// Which store call an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// [`TaskStore::insert`].
    Insert,
    /// [`TaskStore::update`].
    Update,
    /// [`TaskStore::delete`].
    Delete,
    /// [`TaskStore::list_by_owner`].
    List,
}

/// A write request as received by the store, recorded before it is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRecord {
    /// An insert request.
    Insert(NewTask),
    /// An update request.
    Update(TaskId, TaskPatch),
    /// A delete request.
    Delete(TaskId),
}

struct Inner {
    table: String,
    rows: Mutex<HashMap<TaskId, Task>>,
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<String>>>,
    next_subscription: AtomicU64,
    last_created: Mutex<Option<DateTime<Utc>>>,
    failures: Mutex<VecDeque<(Operation, StoreError)>>,
    subscribe_failure: Mutex<Option<String>>,
    writes: Mutex<Vec<WriteRecord>>,
    /// `Some` while notifications are being held back.
    held: Mutex<Option<Vec<String>>>,
}

/// Shared in-memory task table with a change feed. Clones share state.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty backend serving [`DEFAULT_TABLE`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_table(DEFAULT_TABLE)
    }

    /// Creates an empty backend serving `table`.
    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: table.into(),
                rows: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                last_created: Mutex::new(None),
                failures: Mutex::new(VecDeque::new()),
                subscribe_failure: Mutex::new(None),
                writes: Mutex::new(Vec::new()),
                held: Mutex::new(None),
            }),
        }
    }

    /// Stores a row directly, without going through the feed.
    pub fn put_row(&self, task: Task) {
        self.inner.rows.lock().insert(task.id.clone(), task);
    }

    /// Current contents of a row.
    #[must_use]
    pub fn row(&self, id: &TaskId) -> Option<Task> {
        self.inner.rows.lock().get(id).cloned()
    }

    /// Number of stored rows, across all owners.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.inner.rows.lock().len()
    }

    /// Every write request received so far, including failed ones.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.inner.writes.lock().clone()
    }

    /// Makes the next call of kind `op` fail with `error`.
    pub fn fail_next(&self, op: Operation, error: StoreError) {
        self.inner.failures.lock().push_back((op, error));
    }

    /// Makes the next [`ChangeFeed::subscribe`] fail.
    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        *self.inner.subscribe_failure.lock() = Some(reason.into());
    }

    /// Queues notifications instead of delivering them.
    pub fn hold_notifications(&self) {
        let mut held = self.inner.held.lock();
        if held.is_none() {
            *held = Some(Vec::new());
        }
    }

    /// Delivers every held notification in order and resumes live delivery.
    pub fn release_notifications(&self) {
        let queued = self.inner.held.lock().take().unwrap_or_default();
        for payload in queued {
            self.fan_out(&payload);
        }
    }

    /// Discards held notifications, as if the feed never delivered them.
    pub fn drop_held_notifications(&self) -> usize {
        self.inner
            .held
            .lock()
            .as_mut()
            .map_or(0, |queued| std::mem::take(queued).len())
    }

    /// Pushes a notification to subscribers without touching the rows.
    pub fn publish(&self, notification: &ChangeNotification) {
        match encode_row_change(notification, &self.inner.table) {
            Ok(payload) => self.publish_raw(payload),
            Err(e) => tracing::warn!(error = %e, "dropping unencodable notification"),
        }
    }

    /// Pushes a raw payload to subscribers as-is.
    pub fn publish_raw(&self, payload: impl Into<String>) {
        let payload = payload.into();
        {
            let mut held = self.inner.held.lock();
            if let Some(queued) = held.as_mut() {
                queued.push(payload);
                return;
            }
        }
        self.fan_out(&payload);
    }

    /// Drops every subscription, as a broken connection would.
    pub fn close_feed(&self) {
        self.inner.subscribers.lock().clear();
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    fn fan_out(&self, payload: &str) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|id, tx| {
            let delivered = tx.send(payload.to_string()).is_ok();
            if !delivered {
                tracing::debug!(subscription = %id, "pruning closed subscription");
            }
            delivered
        });
    }

    fn take_failure(&self, op: Operation) -> Result<(), StoreError> {
        let mut failures = self.inner.failures.lock();
        let injected = failures
            .iter()
            .position(|(o, _)| *o == op)
            .and_then(|index| failures.remove(index));
        match injected {
            Some((_, error)) => Err(error),
            None => Ok(()),
        }
    }

    fn record(&self, write: WriteRecord) {
        self.inner.writes.lock().push(write);
    }

    /// Strictly increasing creation timestamps.
    fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = self.inner.last_created.lock();
        let mut now = Utc::now();
        if let Some(prev) = *last
            && now <= prev
        {
            now = prev + TimeDelta::microseconds(1);
        }
        *last = Some(now);
        now
    }
}

impl TaskStore for MemoryBackend {
    async fn insert(&self, task: &NewTask) -> Result<TaskId, StoreError> {
        self.record(WriteRecord::Insert(task.clone()));
        self.take_failure(Operation::Insert)?;

        let row = Task {
            id: TaskId::generate(),
            owner: task.owner.clone(),
            title: task.title.clone(),
            completed: task.completed,
            created_at: self.next_created_at(),
            due_date: task.due_date,
            priority: task.priority,
        };
        let id = row.id.clone();
        self.inner.rows.lock().insert(id.clone(), row.clone());
        self.publish(&ChangeNotification::Inserted(row));
        Ok(id)
    }

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), StoreError> {
        self.record(WriteRecord::Update(id.clone(), patch.clone()));
        self.take_failure(Operation::Update)?;

        let updated = {
            let mut rows = self.inner.rows.lock();
            let row = rows
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            patch.apply_to(row);
            row.clone()
        };
        self.publish(&ChangeNotification::Updated(updated));
        Ok(())
    }

    /// Deleting a missing row succeeds and publishes nothing.
    async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        self.record(WriteRecord::Delete(id.clone()));
        self.take_failure(Operation::Delete)?;

        let removed = self.inner.rows.lock().remove(id);
        if let Some(row) = removed {
            self.publish(&ChangeNotification::Deleted(DeletedRow {
                id: row.id,
                owner: Some(row.owner),
            }));
        }
        Ok(())
    }

    async fn list_by_owner(&self, owner: &UserId) -> Result<Vec<Task>, StoreError> {
        self.take_failure(Operation::List)?;
        let mut tasks: Vec<Task> = self
            .inner
            .rows
            .lock()
            .values()
            .filter(|t| &t.owner == owner)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }
}

impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, table: &str) -> Result<Subscription, FeedError> {
        if let Some(reason) = self.inner.subscribe_failure.lock().take() {
            return Err(FeedError::SubscribeFailed(reason));
        }
        if table != self.inner.table {
            return Err(FeedError::SubscribeFailed(format!("unknown table: {table}")));
        }
        let id = SubscriptionId::new(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().insert(id, tx);
        tracing::debug!(subscription = %id, table, "feed subscription opened");
        Ok(Subscription::new(id, rx))
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if self.inner.subscribers.lock().remove(&id).is_some() {
            tracing::debug!(subscription = %id, "feed subscription closed");
        }
    }
}

/// Session whose user is set directly. Clones share state.
#[derive(Clone)]
pub struct MemorySession {
    tx: Arc<watch::Sender<Option<UserId>>>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    /// A session with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// A session with `user` already signed in.
    #[must_use]
    pub fn signed_in(user: UserId) -> Self {
        let session = Self::new();
        session.sign_in(user);
        session
    }

    /// Signs `user` in, replacing any current session.
    pub fn sign_in(&self, user: UserId) {
        self.tx.send_replace(Some(user));
    }
}

impl SessionProvider for MemorySession {
    fn current_user(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        self.tx.send_replace(None);
        Ok(())
    }
}
