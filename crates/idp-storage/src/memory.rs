//! In-memory reference adapter.
//!
//! One `parking_lot::RwLock` guards all maps, so every compound operation runs
//! under a single write guard and is atomic with respect to every other call.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use idp_model::{AuthorizationCode, Client, TokenKind, TokenRecord};
use parking_lot::RwLock;

use crate::client::ClientStore;
use crate::code::{CodeStore, ConsumeOutcome};
use crate::error::{StorageError, StorageResult};
use crate::token::{FamilyRevocation, TokenStore, UseOutcome};

#[derive(Debug, Default)]
struct State {
    clients: HashMap<String, Client>,
    codes: HashMap<String, AuthorizationCode>,
    tokens: HashMap<String, TokenRecord>,
}

impl State {
    fn ensure_new_tokens(&self, records: &[TokenRecord]) -> StorageResult<()> {
        if records.iter().any(|t| self.tokens.contains_key(&t.token_hash)) {
            return Err(StorageError::duplicate("Token", "token_hash"));
        }
        Ok(())
    }

    fn insert_tokens(&mut self, records: &[TokenRecord]) {
        for record in records {
            self.tokens.insert(record.token_hash.clone(), record.clone());
        }
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientStore for MemoryStore {
    fn put_client(&self, client: &Client) -> StorageResult<()> {
        let mut state = self.state.write();
        if state.clients.contains_key(&client.client_id) {
            return Err(StorageError::duplicate("Client", "client_id"));
        }
        state.clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    fn get_client(&self, client_id: &str) -> StorageResult<Option<Client>> {
        Ok(self.state.read().clients.get(client_id).cloned())
    }

    fn update_client(&self, client: &Client) -> StorageResult<()> {
        let mut state = self.state.write();
        match state.clients.get_mut(&client.client_id) {
            Some(existing) => {
                *existing = client.clone();
                Ok(())
            }
            None => Err(StorageError::not_found("Client", client.client_id.clone())),
        }
    }
}

impl CodeStore for MemoryStore {
    fn put_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        let mut state = self.state.write();
        if state.codes.contains_key(&code.code_hash) {
            return Err(StorageError::duplicate("Code", "code_hash"));
        }
        state.codes.insert(code.code_hash.clone(), code.clone());
        Ok(())
    }

    fn get_code(&self, code_hash: &str) -> StorageResult<Option<AuthorizationCode>> {
        Ok(self.state.read().codes.get(code_hash).cloned())
    }

    fn mark_consumed(
        &self,
        code_hash: &str,
        family_id: &str,
        issued: &[TokenRecord],
    ) -> StorageResult<ConsumeOutcome> {
        let mut state = self.state.write();

        match state.codes.get(code_hash) {
            None => return Ok(ConsumeOutcome::NotFound),
            Some(code) if code.consumed => {
                return Ok(ConsumeOutcome::AlreadyConsumed {
                    family_id: code.family_id.clone(),
                });
            }
            Some(_) => {}
        }

        state.ensure_new_tokens(issued)?;

        if let Some(code) = state.codes.get_mut(code_hash) {
            code.consumed = true;
            code.family_id = Some(family_id.to_string());
        }
        state.insert_tokens(issued);

        Ok(ConsumeOutcome::Consumed)
    }

    fn purge_expired_codes(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let mut state = self.state.write();
        let before = state.codes.len();
        state.codes.retain(|_, code| !code.is_expired_at(now));
        let removed = (before - state.codes.len()) as u64;
        tracing::debug!(removed, "purged expired authorization codes");
        Ok(removed)
    }
}

impl TokenStore for MemoryStore {
    fn put_token(&self, token: &TokenRecord) -> StorageResult<()> {
        let mut state = self.state.write();
        state.ensure_new_tokens(std::slice::from_ref(token))?;
        state.insert_tokens(std::slice::from_ref(token));
        Ok(())
    }

    fn get_token(&self, token_hash: &str) -> StorageResult<Option<TokenRecord>> {
        Ok(self.state.read().tokens.get(token_hash).cloned())
    }

    fn mark_used(&self, token_hash: &str, replacements: &[TokenRecord]) -> StorageResult<UseOutcome> {
        let mut state = self.state.write();

        match state.tokens.get(token_hash) {
            None => return Ok(UseOutcome::NotFound),
            Some(token) if token.revoked => return Ok(UseOutcome::Revoked),
            Some(token) if token.used => return Ok(UseOutcome::AlreadyUsed),
            Some(_) => {}
        }

        state.ensure_new_tokens(replacements)?;

        if let Some(token) = state.tokens.get_mut(token_hash) {
            token.used = true;
        }
        state.insert_tokens(replacements);

        Ok(UseOutcome::Used)
    }

    fn revoke(&self, token_hash: &str) -> StorageResult<bool> {
        let mut state = self.state.write();
        match state.tokens.get_mut(token_hash) {
            Some(token) => {
                token.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn revoke_family(&self, family_id: &str, scope: FamilyRevocation) -> StorageResult<u64> {
        let mut state = self.state.write();
        let mut changed = 0;
        for token in state.tokens.values_mut() {
            let selected = match scope {
                FamilyRevocation::All => true,
                FamilyRevocation::RefreshOnly => token.kind == TokenKind::Refresh,
            };
            if selected && token.family_id == family_id && !token.revoked {
                token.revoked = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn purge_expired_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let mut state = self.state.write();
        let before = state.tokens.len();
        state.tokens.retain(|_, token| !token.is_expired_at(now));
        let removed = (before - state.tokens.len()) as u64;
        tracing::debug!(removed, "purged expired tokens");
        Ok(removed)
    }
}
