//! # idp-storage-sql
//!
//! SQLite implementation of the persistence contract, built on `rusqlite`.
//!
//! A [`SqliteStore`] owns one connection behind a mutex. Compound operations
//! (`mark_consumed`, `mark_used`) run in `BEGIN IMMEDIATE` transactions and
//! guard their state flip with a conditional `UPDATE`, so they stay atomic
//! even when several processes share one database file.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod code;
mod convert;
mod entities;
mod error;
mod schema;
mod store;
mod token;

pub use store::{SqliteConfig, SqliteStore};
