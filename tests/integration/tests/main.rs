//! End-to-end integration tests.
//!
//! Every flow runs against the in-memory adapter and against SQLite on a
//! temporary database file.

mod auth_flows;
mod common;
mod concurrency;
mod key_rotation;
mod token_operations;
