//! Task model shared by the reconciler, the backend collaborators and the
//! change-feed payloads.
//!
//! Field names on the wire follow the hosted table's columns (`user_id`,
//! `task`, `is_completed`, `inserted_at`, `dueDate`), so a [`Task`] can be
//! decoded directly from a row delivered by the backend.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Opaque task identifier, assigned by the task store at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps an identifier issued by the task store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh time-ordered identifier (UUID v7).
    ///
    /// Only stores mint identifiers; clients never invent them.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a signed-in user, as issued by the session provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Can wait.
    Low,
    /// The form default.
    #[default]
    Medium,
    /// Needs attention first.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Returned when parsing a [`Priority`] or [`TaskFilter`] from text fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct UnknownVariant(pub String);

/// A persisted task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier, stable for the task's lifetime.
    pub id: TaskId,
    /// The user who created the task. Immutable.
    #[serde(rename = "user_id")]
    pub owner: UserId,
    /// Non-empty title.
    #[serde(rename = "task")]
    pub title: String,
    /// Completion flag, `false` at creation.
    #[serde(rename = "is_completed", default)]
    pub completed: bool,
    /// Store-assigned creation time; the sole sort key (newest first).
    #[serde(rename = "inserted_at")]
    pub created_at: DateTime<Utc>,
    /// Optional calendar due date.
    #[serde(rename = "dueDate", default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Optional priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Form input for the "save" action.
///
/// With an `id` the save updates that task; without one it creates a task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskDraft {
    /// Existing task to update, or `None` to create.
    pub id: Option<TaskId>,
    /// Title as typed by the user.
    pub title: String,
    /// Completion flag carried over from the edited task.
    pub completed: bool,
    /// Optional due date.
    pub due_date: Option<NaiveDate>,
    /// Optional priority.
    pub priority: Option<Priority>,
}

impl TaskDraft {
    /// Draft for a brand new task.
    pub fn create(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Draft pre-filled from an existing task, as the edit form opens it.
    ///
    /// A task without a priority is edited as [`Priority::Medium`].
    #[must_use]
    pub fn edit(task: &Task) -> Self {
        Self {
            id: Some(task.id.clone()),
            title: task.title.clone(),
            completed: task.completed,
            due_date: task.due_date,
            priority: Some(task.priority.unwrap_or_default()),
        }
    }

    /// The mutable fields of this draft as an update patch.
    #[must_use]
    pub fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            title: Some(self.title.clone()),
            completed: Some(self.completed),
            due_date: Some(self.due_date),
            priority: Some(self.priority),
        }
    }
}

/// Insert payload for a new task. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Owning user.
    #[serde(rename = "user_id")]
    pub owner: UserId,
    /// Title.
    #[serde(rename = "task")]
    pub title: String,
    /// Always `false` for inserts issued by the reconciler.
    #[serde(rename = "is_completed")]
    pub completed: bool,
    /// Optional due date.
    #[serde(rename = "dueDate", default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Optional priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Partial update of a task's mutable fields.
///
/// `None` leaves a field untouched. For the nullable fields, `Some(None)`
/// clears the value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    #[serde(rename = "task", default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New completion flag.
    #[serde(rename = "is_completed", default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// New due date, or `Some(None)` to clear it.
    #[serde(
        rename = "dueDate",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable"
    )]
    pub due_date: Option<Option<NaiveDate>>,
    /// New priority, or `Some(None)` to clear it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable"
    )]
    pub priority: Option<Option<Priority>>,
}

impl TaskPatch {
    /// Patch that only sets the completion flag.
    #[must_use]
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    /// Applies this patch to a task in place.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.completed.is_none()
            && self.due_date.is_none()
            && self.priority.is_none()
    }
}

/// A present-but-null field deserializes to `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Which tasks a view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskFilter {
    /// Every task.
    #[default]
    All,
    /// Only completed tasks.
    Completed,
    /// Only tasks not yet completed.
    Pending,
}

impl TaskFilter {
    /// Returns `true` if `task` belongs in this view.
    #[must_use]
    pub const fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Completed => task.completed,
            Self::Pending => !task.completed,
        }
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Completed => write!(f, "completed"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

impl FromStr for TaskFilter {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "completed" | "done" => Ok(Self::Completed),
            "pending" | "open" => Ok(Self::Pending),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Reasons a title is rejected before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TitleError {
    /// Empty, or only whitespace.
    #[error("task title cannot be empty")]
    Empty,
    /// Longer than the configured limit.
    #[error("task title too long (max {max} characters)")]
    TooLong {
        /// The limit in characters.
        max: usize,
    },
}

/// Checks a title against the emptiness and length rules.
///
/// Length is counted in characters, not bytes.
///
/// # Errors
///
/// Returns [`TitleError::Empty`] for a blank title and
/// [`TitleError::TooLong`] when it exceeds `max_len` characters.
pub fn validate_title(title: &str, max_len: usize) -> Result<(), TitleError> {
    if title.trim().is_empty() {
        return Err(TitleError::Empty);
    }
    if title.chars().count() > max_len {
        return Err(TitleError::TooLong { max: max_len });
    }
    Ok(())
}
