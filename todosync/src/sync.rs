//! Sync runtime wiring the reconciler to its collaborators.
//!
//! One background tokio task owns the [`Reconciler`] and serializes every
//! input into it: commands from the presentation layer, notifications from
//! the change feed and session transitions. Readers never touch the list;
//! they receive [`SyncEvent::ListChanged`] snapshots.
//!
//! # Architecture
//!
//! ```text
//! presentation  ─── SyncCommand ──→ ┌────────────┐ ←── notifications ─── ChangeFeed
//!               ←── SyncEvent ───── │ SyncWorker │ ←── session changes ─ SessionProvider
//!                                   └─────┬──────┘
//!                                         └── writes / bulk read ──→ TaskStore
//! ```
//!
//! On sign-in the worker subscribes to the feed *before* the bulk read, so
//! no change committed during the read is lost; anything it already saw is
//! absorbed by the reconciler's duplicate and unknown-id rules.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use todosync_proto::change::ChangeNotification;
use todosync_proto::task::{Task, TaskDraft, TaskId, UserId};

use crate::backend::{ChangeFeed, FeedError, SessionError, SessionProvider, Subscription, TaskStore};
use crate::tasks::{NotificationOutcome, ReconcileError, Reconciler, SaveOutcome};

/// Default capacity of the command and event channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Intents dispatched from the presentation layer.
#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// Flip a task's completion flag.
    Toggle(TaskId),
    /// Delete a task.
    Delete(TaskId),
    /// Create or update a task from a form draft.
    Save(TaskDraft),
    /// Sign the current user out.
    SignOut,
    /// Stop the worker.
    Shutdown,
}

/// The command a [`SyncEvent`] reports on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A toggle of this task.
    Toggle(TaskId),
    /// A delete of this task.
    Delete(TaskId),
    /// A save that creates a task.
    Create,
    /// A save that updates this task.
    Update(TaskId),
    /// A sign-out.
    SignOut,
}

impl Action {
    fn for_command(command: &SyncCommand) -> Option<Self> {
        match command {
            SyncCommand::Toggle(id) => Some(Self::Toggle(id.clone())),
            SyncCommand::Delete(id) => Some(Self::Delete(id.clone())),
            SyncCommand::Save(draft) => Some(
                draft
                    .id
                    .as_ref()
                    .map_or(Self::Create, |id| Self::Update(id.clone())),
            ),
            SyncCommand::SignOut => Some(Self::SignOut),
            SyncCommand::Shutdown => None,
        }
    }
}

/// Events emitted by the worker.
#[derive(Debug)]
pub enum SyncEvent {
    /// A new session started (or `None`: signed out). The list was cleared.
    SessionChanged(Option<UserId>),
    /// The initial bulk read succeeded.
    Seeded {
        /// Number of tasks loaded.
        count: usize,
    },
    /// The initial bulk read failed; the list stays empty.
    LoadFailed(ReconcileError),
    /// A fresh snapshot of the list, newest first.
    ListChanged(Vec<Task>),
    /// The remote write was accepted. The list follows when the feed
    /// confirms it.
    Accepted(Action),
    /// A save created a task with this id.
    Created(TaskId),
    /// The command referenced a task not in the list and did nothing.
    Skipped(Action),
    /// The command failed; the list is unchanged.
    Rejected {
        /// What was attempted.
        action: Action,
        /// Why it failed.
        error: ReconcileError,
    },
    /// Sign-out failed; the session is unchanged.
    SignOutFailed(SessionError),
    /// The feed subscription failed or dropped. Not retried.
    FeedLost(FeedError),
}

/// Runtime settings for [`spawn_sync`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Table whose changes are subscribed to.
    pub table: String,
    /// Capacity of the command and event channels.
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            table: crate::backend::memory::DEFAULT_TABLE.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handles returned by [`spawn_sync`].
pub struct SyncHandle {
    /// Send commands to the worker.
    pub commands: mpsc::Sender<SyncCommand>,
    /// Receive events from the worker.
    pub events: mpsc::Receiver<SyncEvent>,
    /// Completes when the worker stops.
    pub join: JoinHandle<()>,
}

/// Spawn the sync worker.
///
/// The worker adopts whatever session `session` currently reports, then
/// follows its changes until [`SyncCommand::Shutdown`], until every command
/// sender is dropped, or until the session provider goes away.
pub fn spawn_sync<S, F, P>(
    reconciler: Reconciler<S>,
    feed: F,
    session: P,
    config: SyncConfig,
) -> SyncHandle
where
    S: TaskStore + 'static,
    F: ChangeFeed + 'static,
    P: SessionProvider + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
    let (evt_tx, evt_rx) = mpsc::channel(config.channel_capacity);
    let session_rx = session.watch();

    let worker = SyncWorker {
        reconciler,
        feed,
        session,
        table: config.table,
        subscription: None,
        events: evt_tx,
    };
    let join = tokio::spawn(worker.run(cmd_rx, session_rx));

    SyncHandle {
        commands: cmd_tx,
        events: evt_rx,
        join,
    }
}

enum Step {
    Command(Option<SyncCommand>),
    Session(bool),
    Feed(Result<ChangeNotification, FeedError>),
}

struct SyncWorker<S: TaskStore, F, P> {
    reconciler: Reconciler<S>,
    feed: F,
    session: P,
    table: String,
    subscription: Option<Subscription>,
    events: mpsc::Sender<SyncEvent>,
}

impl<S, F, P> SyncWorker<S, F, P>
where
    S: TaskStore,
    F: ChangeFeed,
    P: SessionProvider,
{
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SyncCommand>,
        mut session_rx: watch::Receiver<Option<UserId>>,
    ) {
        let initial = session_rx.borrow_and_update().clone();
        if initial.is_some() {
            self.switch_session(initial).await;
        }

        loop {
            let step = tokio::select! {
                cmd = commands.recv() => Step::Command(cmd),
                changed = session_rx.changed() => Step::Session(changed.is_ok()),
                item = next_notification(&mut self.subscription) => Step::Feed(item),
            };

            match step {
                Step::Command(None | Some(SyncCommand::Shutdown)) => break,
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Session(false) => {
                    tracing::info!("session provider gone, stopping sync");
                    break;
                }
                Step::Session(true) => {
                    let user = session_rx.borrow_and_update().clone();
                    self.switch_session(user).await;
                }
                Step::Feed(Ok(notification)) => {
                    if self.reconciler.apply_remote_notification(&notification)
                        == NotificationOutcome::Applied
                    {
                        self.emit_snapshot().await;
                    }
                }
                Step::Feed(Err(FeedError::Decode(e))) => {
                    tracing::warn!(error = %e, "skipping undecodable change payload");
                }
                Step::Feed(Err(e)) => {
                    tracing::warn!(error = %e, "change feed lost");
                    self.subscription = None;
                    self.emit(SyncEvent::FeedLost(e)).await;
                }
            }
        }

        self.detach().await;
        tracing::debug!("sync worker stopped");
    }

    async fn handle_command(&mut self, command: SyncCommand) {
        let Some(action) = Action::for_command(&command) else {
            return;
        };
        let result = match command {
            SyncCommand::Toggle(id) => self.reconciler.apply_local_toggle(&id).await,
            SyncCommand::Delete(id) => self.reconciler.apply_local_delete(&id).await,
            SyncCommand::Save(draft) => match self.reconciler.apply_local_save(&draft).await {
                Ok(SaveOutcome::Created(id)) => {
                    self.emit(SyncEvent::Created(id)).await;
                    Ok(true)
                }
                Ok(SaveOutcome::Updated(_)) => Ok(true),
                Err(e) => Err(e),
            },
            SyncCommand::SignOut => {
                if let Err(e) = self.session.sign_out().await {
                    tracing::warn!(error = %e, "sign-out failed");
                    self.emit(SyncEvent::SignOutFailed(e)).await;
                }
                // The session watch delivers the transition.
                return;
            }
            SyncCommand::Shutdown => return,
        };

        let event = match result {
            Ok(true) => SyncEvent::Accepted(action),
            Ok(false) => SyncEvent::Skipped(action),
            Err(error) => SyncEvent::Rejected { action, error },
        };
        self.emit(event).await;
    }

    /// Tear down the current session and, for a signed-in user, attach to
    /// the feed and seed the list.
    async fn switch_session(&mut self, user: Option<UserId>) {
        self.detach().await;
        self.reconciler.set_user(user.clone());
        self.emit(SyncEvent::SessionChanged(user.clone())).await;
        self.emit_snapshot().await;

        if user.is_none() {
            return;
        }

        match self.feed.subscribe(&self.table).await {
            Ok(subscription) => {
                tracing::debug!(subscription = %subscription.id(), "feed attached");
                self.subscription = Some(subscription);
            }
            Err(e) => {
                tracing::warn!(error = %e, "feed subscription failed");
                self.emit(SyncEvent::FeedLost(e)).await;
            }
        }

        match self.reconciler.load().await {
            Ok(count) => {
                self.emit(SyncEvent::Seeded { count }).await;
                self.emit_snapshot().await;
            }
            Err(e) => self.emit(SyncEvent::LoadFailed(e)).await,
        }
    }

    async fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.feed.unsubscribe(subscription.id()).await;
        }
    }

    async fn emit_snapshot(&self) {
        self.emit(SyncEvent::ListChanged(self.reconciler.snapshot()))
            .await;
    }

    async fn emit(&self, event: SyncEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

/// Next feed item, or pending forever while detached.
async fn next_notification(
    subscription: &mut Option<Subscription>,
) -> Result<ChangeNotification, FeedError> {
    match subscription {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}
