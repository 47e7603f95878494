//! Application state and line-oriented intent handling.
//!
//! The shell never mutates tasks itself. Each input line becomes a
//! [`Dispatch`]: a [`SyncCommand`] for the sync worker, a sign-in for the
//! session provider, or text to print. The displayed list is replaced
//! wholesale whenever the worker emits a snapshot.

use std::fmt::Write as _;

use chrono::NaiveDate;

use todosync_proto::task::{Priority, Task, TaskDraft, TaskFilter, TaskId, UnknownVariant, UserId};

use crate::sync::{Action, SyncCommand, SyncEvent};

/// Shown for an empty unfiltered list.
pub const EMPTY_LIST: &str = "No tasks yet. Add one with `add <title>`.";
/// Shown for an empty filtered view.
pub const EMPTY_FILTER: &str = "No tasks in this category.";

const HELP: &[&str] = &[
    "add <title> [--due YYYY-MM-DD] [--priority low|medium|high]",
    "edit <task> [--title <title>] [--due YYYY-MM-DD | --no-due] [--priority p]",
    "toggle <task>      flip completed",
    "delete <task>",
    "filter all|completed|pending",
    "list",
    "login <user>       logout",
    "quit",
    "<task> is a row number from the current view or an id prefix.",
];

/// Errors from parsing or resolving an input line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    /// The first word is not a known command.
    #[error("unknown command `{0}` (try `help`)")]
    UnknownCommand(String),
    /// A required argument was not given.
    #[error("missing {0}")]
    MissingArgument(&'static str),
    /// A flag the command does not accept.
    #[error("unknown option `{0}`")]
    UnknownFlag(String),
    /// A due date that is not `YYYY-MM-DD`.
    #[error("invalid date `{0}`, expected YYYY-MM-DD")]
    InvalidDate(String),
    /// A priority or filter name that is not recognized.
    #[error(transparent)]
    InvalidValue(#[from] UnknownVariant),
    /// The task reference matches nothing in the current view.
    #[error("no task matches `{0}`")]
    NoSuchTask(String),
    /// An id prefix matches more than one task.
    #[error("`{0}` matches more than one task")]
    AmbiguousTask(String),
    /// The command needs a signed-in user.
    #[error("sign in first with `login <user>`")]
    SignedOut,
}

/// A way of naming a task on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef {
    /// 1-based row in the current filtered view.
    Row(usize),
    /// Full id or unique id prefix.
    Id(String),
}

impl TaskRef {
    fn parse(word: &str) -> Self {
        match word.parse::<usize>() {
            Ok(row) if row > 0 => Self::Row(row),
            _ => Self::Id(word.to_string()),
        }
    }
}

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Create a task.
    Add {
        /// Title as typed.
        title: String,
        /// Optional due date.
        due_date: Option<NaiveDate>,
        /// Optional priority.
        priority: Option<Priority>,
    },
    /// Change fields of an existing task. `None` leaves a field as is.
    Edit {
        /// Which task.
        target: TaskRef,
        /// New title.
        title: Option<String>,
        /// New due date (`Some(None)` clears it).
        due_date: Option<Option<NaiveDate>>,
        /// New priority.
        priority: Option<Priority>,
    },
    /// Flip completion.
    Toggle(TaskRef),
    /// Delete a task.
    Delete(TaskRef),
    /// Change the displayed filter.
    Filter(TaskFilter),
    /// Print the current view.
    List,
    /// Sign in.
    Login(UserId),
    /// Sign out.
    Logout,
    /// Print usage.
    Help,
    /// Exit.
    Quit,
}

/// Flags and the words following each, in input order.
struct Words<'a> {
    positional: Vec<&'a str>,
    flags: Vec<(&'a str, Vec<&'a str>)>,
}

impl<'a> Words<'a> {
    fn split(rest: &'a str) -> Self {
        let mut positional = Vec::new();
        let mut flags: Vec<(&str, Vec<&str>)> = Vec::new();
        for word in rest.split_whitespace() {
            if let Some(name) = word.strip_prefix("--") {
                flags.push((name, Vec::new()));
            } else if let Some((_, values)) = flags.last_mut() {
                values.push(word);
            } else {
                positional.push(word);
            }
        }
        Self { positional, flags }
    }
}

fn parse_date(values: &[&str]) -> Result<NaiveDate, IntentError> {
    let raw = values.join(" ");
    if raw.is_empty() {
        return Err(IntentError::MissingArgument("date after --due"));
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| IntentError::InvalidDate(raw))
}

fn parse_priority(values: &[&str]) -> Result<Priority, IntentError> {
    match values {
        [] => Err(IntentError::MissingArgument("value after --priority")),
        words => Ok(words.join(" ").parse()?),
    }
}

fn single_ref(words: &Words<'_>, what: &'static str) -> Result<TaskRef, IntentError> {
    if let Some((flag, _)) = words.flags.first() {
        return Err(IntentError::UnknownFlag(format!("--{flag}")));
    }
    words
        .positional
        .first()
        .map(|w| TaskRef::parse(w))
        .ok_or(IntentError::MissingArgument(what))
}

/// Parse one input line. Returns `Ok(None)` for a blank line.
///
/// # Errors
///
/// Returns [`IntentError`] for unknown commands, flags or malformed values.
pub fn parse_intent(line: &str) -> Result<Option<Intent>, IntentError> {
    let line = line.trim();
    let Some(command) = line.split_whitespace().next() else {
        return Ok(None);
    };
    let words = Words::split(line[command.len()..].trim_start());

    let intent = match command.to_ascii_lowercase().as_str() {
        "add" | "new" => {
            let mut due_date = None;
            let mut priority = None;
            for (flag, values) in &words.flags {
                match *flag {
                    "due" => due_date = Some(parse_date(values)?),
                    "priority" => priority = Some(parse_priority(values)?),
                    other => return Err(IntentError::UnknownFlag(format!("--{other}"))),
                }
            }
            let title = words.positional.join(" ");
            if title.is_empty() {
                return Err(IntentError::MissingArgument("title"));
            }
            Intent::Add {
                title,
                due_date,
                priority,
            }
        }
        "edit" => {
            let target = words
                .positional
                .first()
                .map(|w| TaskRef::parse(w))
                .ok_or(IntentError::MissingArgument("task"))?;
            let mut title = None;
            let mut due_date = None;
            let mut priority = None;
            for (flag, values) in &words.flags {
                match *flag {
                    "title" => title = Some(values.join(" ")),
                    "due" => due_date = Some(Some(parse_date(values)?)),
                    "no-due" => due_date = Some(None),
                    "priority" => priority = Some(parse_priority(values)?),
                    other => return Err(IntentError::UnknownFlag(format!("--{other}"))),
                }
            }
            Intent::Edit {
                target,
                title,
                due_date,
                priority,
            }
        }
        "toggle" | "done" => Intent::Toggle(single_ref(&words, "task")?),
        "delete" | "rm" => Intent::Delete(single_ref(&words, "task")?),
        "filter" => {
            let name = words
                .positional
                .first()
                .ok_or(IntentError::MissingArgument("filter name"))?;
            Intent::Filter(name.parse()?)
        }
        "list" | "ls" => Intent::List,
        "login" => {
            let user = words
                .positional
                .first()
                .ok_or(IntentError::MissingArgument("user id"))?;
            Intent::Login(UserId::new(*user))
        }
        "logout" => Intent::Logout,
        "help" | "?" => Intent::Help,
        "quit" | "exit" => Intent::Quit,
        other => return Err(IntentError::UnknownCommand(other.to_string())),
    };
    Ok(Some(intent))
}

/// What the caller should do with an input line.
#[derive(Debug)]
pub enum Dispatch {
    /// Forward to the sync worker.
    Command(SyncCommand),
    /// Ask the session provider to sign in.
    SignIn(UserId),
    /// Print these lines.
    Print(Vec<String>),
    /// Exit the shell.
    Quit,
}

/// Main application state.
#[derive(Debug, Default)]
pub struct App {
    tasks: Vec<Task>,
    filter: TaskFilter,
    user: Option<UserId>,
}

impl App {
    /// Create an empty, signed-out shell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The filter applied to the displayed list.
    #[must_use]
    pub const fn filter(&self) -> TaskFilter {
        self.filter
    }

    /// The last snapshot received.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// The signed-in user, as last reported by the worker.
    #[must_use]
    pub const fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Turn one input line into a [`Dispatch`].
    pub fn handle_line(&mut self, line: &str) -> Dispatch {
        match parse_intent(line).and_then(|intent| self.dispatch(intent)) {
            Ok(dispatch) => dispatch,
            Err(e) => Dispatch::Print(vec![format!("error: {e}")]),
        }
    }

    fn dispatch(&mut self, intent: Option<Intent>) -> Result<Dispatch, IntentError> {
        let Some(intent) = intent else {
            return Ok(Dispatch::Print(Vec::new()));
        };
        let command = match intent {
            Intent::Add {
                title,
                due_date,
                priority,
            } => {
                self.require_user()?;
                let mut draft = TaskDraft::create(title);
                draft.due_date = due_date;
                draft.priority = priority;
                SyncCommand::Save(draft)
            }
            Intent::Edit {
                target,
                title,
                due_date,
                priority,
            } => {
                let mut draft = TaskDraft::edit(self.resolve(&target)?);
                if let Some(title) = title {
                    draft.title = title;
                }
                if let Some(due_date) = due_date {
                    draft.due_date = due_date;
                }
                if priority.is_some() {
                    draft.priority = priority;
                }
                SyncCommand::Save(draft)
            }
            Intent::Toggle(target) => SyncCommand::Toggle(self.resolve(&target)?.id.clone()),
            Intent::Delete(target) => SyncCommand::Delete(self.resolve(&target)?.id.clone()),
            Intent::Filter(filter) => {
                self.filter = filter;
                return Ok(Dispatch::Print(self.render()));
            }
            Intent::List => return Ok(Dispatch::Print(self.render())),
            Intent::Login(user) => return Ok(Dispatch::SignIn(user)),
            Intent::Logout => {
                self.require_user()?;
                SyncCommand::SignOut
            }
            Intent::Help => {
                return Ok(Dispatch::Print(
                    HELP.iter().map(|line| (*line).to_string()).collect(),
                ));
            }
            Intent::Quit => return Ok(Dispatch::Quit),
        };
        Ok(Dispatch::Command(command))
    }

    const fn require_user(&self) -> Result<(), IntentError> {
        if self.user.is_none() {
            return Err(IntentError::SignedOut);
        }
        Ok(())
    }

    fn visible(&self) -> impl Iterator<Item = &Task> {
        let filter = self.filter;
        self.tasks.iter().filter(move |t| filter.matches(t))
    }

    /// Find the task a reference names within the current view.
    ///
    /// # Errors
    ///
    /// [`IntentError::NoSuchTask`] when nothing matches and
    /// [`IntentError::AmbiguousTask`] when an id prefix matches several.
    pub fn resolve(&self, target: &TaskRef) -> Result<&Task, IntentError> {
        self.require_user()?;
        match target {
            TaskRef::Row(row) => row
                .checked_sub(1)
                .and_then(|i| self.visible().nth(i))
                .ok_or_else(|| IntentError::NoSuchTask(row.to_string())),
            TaskRef::Id(prefix) => {
                if let Some(exact) = self.visible().find(|t| t.id.as_str() == prefix) {
                    return Ok(exact);
                }
                let mut matches = self
                    .visible()
                    .filter(|t| t.id.as_str().starts_with(prefix.as_str()));
                match (matches.next(), matches.next()) {
                    (Some(task), None) => Ok(task),
                    (Some(_), Some(_)) => Err(IntentError::AmbiguousTask(prefix.clone())),
                    (None, _) => Err(IntentError::NoSuchTask(prefix.clone())),
                }
            }
        }
    }

    /// Apply a worker event. Returns the lines to print.
    pub fn handle_event(&mut self, event: SyncEvent) -> Vec<String> {
        match event {
            SyncEvent::SessionChanged(user) => {
                self.tasks.clear();
                let line = user.as_ref().map_or_else(
                    || "Signed out.".to_string(),
                    |u| format!("Signed in as {u}."),
                );
                self.user = user;
                vec![line]
            }
            SyncEvent::Seeded { count } => vec![format!("Loaded {count} task(s).")],
            SyncEvent::LoadFailed(e) => vec![format!("Could not load tasks: {e}")],
            SyncEvent::ListChanged(tasks) => {
                self.tasks = tasks;
                if self.user.is_some() {
                    self.render()
                } else {
                    Vec::new()
                }
            }
            SyncEvent::Accepted(_) | SyncEvent::Created(_) => Vec::new(),
            SyncEvent::Skipped(action) => {
                vec![format!("Nothing to {}: task is gone.", describe(&action))]
            }
            SyncEvent::Rejected { action, error } => {
                vec![format!("Could not {}: {error}", describe(&action))]
            }
            SyncEvent::SignOutFailed(e) => vec![format!("Could not sign out: {e}")],
            SyncEvent::FeedLost(e) => vec![format!(
                "Live updates stopped ({e}). Sign in again to resume."
            )],
        }
    }

    /// Render the current view, one line per task.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![format!("-- {} --", self.filter)];
        let before = lines.len();
        lines.extend(
            self.visible()
                .enumerate()
                .map(|(i, task)| render_task(i + 1, task)),
        );
        if lines.len() == before {
            lines.push(
                match self.filter {
                    TaskFilter::All => EMPTY_LIST,
                    TaskFilter::Completed | TaskFilter::Pending => EMPTY_FILTER,
                }
                .to_string(),
            );
        }
        lines
    }
}

fn render_task(row: usize, task: &Task) -> String {
    let mark = if task.completed { 'x' } else { ' ' };
    let mut line = format!("{row:>3}. [{mark}] {}", task.title);
    let mut details = Vec::new();
    if let Some(due) = task.due_date {
        details.push(format!("due {}", due.format("%Y-%m-%d")));
    }
    if let Some(priority) = task.priority {
        details.push(priority.to_string());
    }
    if !details.is_empty() {
        let _ = write!(line, "  ({})", details.join(", "));
    }
    let _ = write!(line, "  #{}", short_id(&task.id));
    line
}

fn short_id(id: &TaskId) -> &str {
    let s = id.as_str();
    s.char_indices().nth(8).map_or(s, |(end, _)| &s[..end])
}

fn describe(action: &Action) -> String {
    match action {
        Action::Toggle(id) => format!("toggle {}", short_id(id)),
        Action::Delete(id) => format!("delete {}", short_id(id)),
        Action::Create => "add task".to_string(),
        Action::Update(id) => format!("edit {}", short_id(id)),
        Action::SignOut => "sign out".to_string(),
    }
}
