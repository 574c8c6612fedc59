//! `tasksync`: live-synchronized task list client library.

pub mod api;
pub mod config;
pub mod connection;
pub mod sync;
pub mod tasks;
pub mod transport;
