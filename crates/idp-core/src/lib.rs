//! # idp-core
//!
//! Configuration, error types and security events shared by the identity
//! provider crates.
//!
//! ## Modules
//!
//! - [`config`] - Provider policy and lifetimes (`ProviderConfig`)
//! - [`error`] - Configuration validation errors
//! - [`event`] - Security event model and listeners

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod event;

pub use config::{PkcePolicy, ProviderConfig, RedirectPolicy, RevocationCascade};
pub use error::ConfigError;
pub use event::{Event, EventListener, EventOutcome, EventType};
