//! The ordered in-memory task collection.
//!
//! `TaskList` holds one user's tasks sorted by `created_at`, newest first,
//! with at most one entry per id. It knows nothing about sessions or the
//! backend: the reconciler decides *whether* a change applies, this type
//! decides *where* it lands.

use todosync_proto::task::{Task, TaskFilter, TaskId};

/// Tasks ordered by descending `created_at`, unique by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Replaces the whole list.
    ///
    /// Duplicate ids keep their first occurrence. The result is sorted
    /// stably by `created_at`, newest first, whatever order `tasks` came in.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        let mut seen = std::collections::HashSet::with_capacity(tasks.len());
        let mut unique: Vec<Task> = tasks
            .into_iter()
            .filter(|t| seen.insert(t.id.clone()))
            .collect();
        unique.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.tasks = unique;
    }

    /// Removes every task.
    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Inserts a task at its `created_at` position.
    ///
    /// Ties go before existing entries with the same timestamp. Returns
    /// `false` without changing anything if the id is already present.
    pub fn insert(&mut self, task: Task) -> bool {
        if self.contains(&task.id) {
            return false;
        }
        let at = self
            .tasks
            .partition_point(|existing| existing.created_at > task.created_at);
        self.tasks.insert(at, task);
        true
    }

    /// Replaces the entry with the same id.
    ///
    /// The entry stays where it is unless `created_at` changed, in which
    /// case it is moved to keep the ordering. Returns `false` for an
    /// unknown id.
    pub fn update(&mut self, task: Task) -> bool {
        let Some(index) = self.position(&task.id) else {
            return false;
        };
        if self.tasks[index].created_at == task.created_at {
            self.tasks[index] = task;
        } else {
            self.tasks.remove(index);
            let at = self
                .tasks
                .partition_point(|existing| existing.created_at > task.created_at);
            self.tasks.insert(at, task);
        }
        true
    }

    /// Removes the entry with `id`, returning it if it was present.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let index = self.position(id)?;
        Some(self.tasks.remove(index))
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Returns `true` if a task with `id` is present.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.position(id).is_some()
    }

    /// Number of tasks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if there are no tasks.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All tasks, newest first.
    #[must_use]
    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    /// Lazy view of the tasks matching `filter`, newest first.
    ///
    /// The iterator is `Clone`, so a caller can walk it more than once.
    pub fn filtered(&self, filter: TaskFilter) -> FilteredView<'_> {
        FilteredView {
            inner: self.tasks.iter(),
            filter,
        }
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == id)
    }
}

/// Iterator returned by [`TaskList::filtered`].
#[derive(Debug, Clone)]
pub struct FilteredView<'a> {
    inner: std::slice::Iter<'a, Task>,
    filter: TaskFilter,
}

impl<'a> Iterator for FilteredView<'a> {
    type Item = &'a Task;

    fn next(&mut self) -> Option<Self::Item> {
        let filter = self.filter;
        self.inner.find(|t| filter.matches(t))
    }
}
