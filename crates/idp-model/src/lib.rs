//! # idp-model
//!
//! Domain models for the identity provider core.
//!
//! - [`Client`] - a registered OAuth 2.0 / OIDC client
//! - [`AuthorizationCode`] - a single-use code awaiting exchange
//! - [`TokenRecord`] - the persisted view of an access or refresh token
//!
//! Secret values (codes, tokens, client secrets) never appear in these types;
//! only their digests do.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub mod code;
pub mod token;
pub mod types;

pub use client::{Client, ClientMetadata};
pub use code::AuthorizationCode;
pub use token::TokenRecord;
pub use types::{ClientType, CodeChallengeMethod, GrantType, ResponseType, Scopes, TokenKind};
