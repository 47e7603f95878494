//! External collaborators: the task store, its change feed and the
//! session provider.
//!
//! Each is a trait so the reconciler and the sync runtime can run against
//! the hosted backend or the in-process [`memory`] implementation.
//! Implementations never inspect the reconciler's list.

pub mod memory;

use std::fmt;

use tokio::sync::{mpsc, watch};

use todosync_proto::change::{ChangeNotification, CodecError, decode_row_change};
use todosync_proto::task::{NewTask, Task, TaskId, TaskPatch, UserId};

/// Errors returned by a [`TaskStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The request never reached the store or its answer was lost.
    #[error("transport error: {0}")]
    Transport(String),
    /// Row-level authorization refused the operation.
    #[error("not authorized: {0}")]
    Unauthorized(String),
    /// The target row does not exist.
    #[error("row not found: {0}")]
    NotFound(TaskId),
    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,
}

/// Errors produced by a [`ChangeFeed`] or a [`Subscription`].
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The subscription could not be established.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    /// The feed dropped the subscription.
    #[error("change feed closed")]
    Closed,
    /// A pushed payload could not be decoded.
    #[error("undecodable change payload: {0}")]
    Decode(#[from] CodecError),
}

/// Errors returned by a [`SessionProvider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Signing out was refused or could not be delivered.
    #[error("sign-out failed: {0}")]
    SignOutFailed(String),
}

/// Remote table of tasks, keyed by id and filtered by owner.
///
/// Every successful write is echoed later through the [`ChangeFeed`].
pub trait TaskStore: Send + Sync {
    /// Insert a new row. Returns the store-assigned id.
    fn insert(
        &self,
        task: &NewTask,
    ) -> impl std::future::Future<Output = Result<TaskId, StoreError>> + Send;

    /// Apply `patch` to the row with `id`.
    fn update(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Delete the row with `id`.
    fn delete(&self, id: &TaskId)
    -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// All rows owned by `owner`, newest first.
    fn list_by_owner(
        &self,
        owner: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, StoreError>> + Send;
}

/// Handle identifying one feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wraps a raw handle value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live attachment to the change feed.
///
/// Carries raw JSON payloads exactly as the backend pushed them and decodes
/// them on receipt. The channel is unbounded so a producer never waits on a
/// consumer that is itself awaiting a store call.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    /// Wraps the receiving half of a feed channel.
    #[must_use]
    pub const fn new(id: SubscriptionId, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { id, rx }
    }

    /// This subscription's handle.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next notification.
    ///
    /// Cancel safe.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] once the feed has dropped the
    /// subscription, and [`FeedError::Decode`] for a payload that does not
    /// decode (the subscription remains usable).
    pub async fn next(&mut self) -> Result<ChangeNotification, FeedError> {
        let payload = self.rx.recv().await.ok_or(FeedError::Closed)?;
        Ok(decode_row_change(&payload)?)
    }
}

/// Push channel of row changes for a table.
///
/// Delivery order across different rows is unspecified; per-row changes are
/// assumed to arrive in commit order.
pub trait ChangeFeed: Send + Sync {
    /// Attach to the change stream of `table`.
    fn subscribe(
        &self,
        table: &str,
    ) -> impl std::future::Future<Output = Result<Subscription, FeedError>> + Send;

    /// Detach a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, id: SubscriptionId) -> impl std::future::Future<Output = ()> + Send;
}

/// Source of the signed-in user's identity.
pub trait SessionProvider: Send + Sync {
    /// The current user, if anyone is signed in.
    fn current_user(&self) -> Option<UserId>;

    /// A receiver that observes every session change.
    fn watch(&self) -> watch::Receiver<Option<UserId>>;

    /// End the current session.
    fn sign_out(&self) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}
