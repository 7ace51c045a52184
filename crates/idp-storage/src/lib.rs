//! # idp-storage
//!
//! The persistence contract for the identity provider core.
//!
//! Every backend implements the same three traits and must honour the same
//! atomicity rules: [`CodeStore::mark_consumed`] and [`TokenStore::mark_used`]
//! are read-modify-write operations where, of any number of concurrent callers,
//! exactly one wins. The [`conformance`] module (feature `conformance`) checks
//! those rules against any adapter.
//!
//! ## Store Traits
//!
//! - [`ClientStore`] - registered clients
//! - [`CodeStore`] - authorization codes
//! - [`TokenStore`] - access and refresh token records
//!
//! ## Adapters
//!
//! - [`MemoryStore`] - in-process reference adapter

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub mod code;
pub mod error;
pub mod memory;
pub mod token;

#[cfg(any(test, feature = "conformance"))]
pub mod conformance;

pub use client::ClientStore;
pub use code::{CodeStore, ConsumeOutcome};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use token::{FamilyRevocation, TokenStore, UseOutcome};

/// A complete backend: clients, codes and tokens in one store.
pub trait Store: ClientStore + CodeStore + TokenStore {}

impl<T: ClientStore + CodeStore + TokenStore> Store for T {}
