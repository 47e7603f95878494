//! `todosync`: a personal task list reconciled against a remote task
//! store and its change feed.

pub mod app;
pub mod backend;
pub mod config;
pub mod sync;
pub mod tasks;
