//! Shared task model and change-feed payload definitions for `TodoSync`.

pub mod change;
pub mod task;
