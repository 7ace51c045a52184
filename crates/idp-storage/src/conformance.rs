//! Conformance suite for [`Store`] adapters.
//!
//! Every adapter runs [`run_all`] against a fresh store from its own tests:
//!
//! ```ignore
//! #[test]
//! fn conformance() {
//!     idp_storage::conformance::run_all(&MyStore::new()).unwrap();
//! }
//! ```
//!
//! Checks panic on contract violations; backend failures are returned as
//! `Err` so the adapter test reports the underlying error. All identifiers
//! are random, so the suite can run repeatedly against one store.

use std::sync::Barrier;

use chrono::{Duration, Utc};
use idp_model::{AuthorizationCode, Client, ClientType, GrantType, ResponseType, Scopes, TokenKind, TokenRecord};
use uuid::Uuid;

use crate::code::ConsumeOutcome;
use crate::error::{StorageError, StorageResult};
use crate::token::{FamilyRevocation, UseOutcome};
use crate::Store;

/// Number of threads racing in the concurrency checks.
pub const RACERS: usize = 8;

/// Runs every check in this module.
///
/// # Errors
///
/// Returns the first backend error encountered.
pub fn run_all<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    client_round_trip(store)?;
    code_round_trip(store)?;
    consume_exactly_once(store)?;
    consume_stores_tokens_atomically(store)?;
    concurrent_consume_has_one_winner(store)?;
    mark_used_exactly_once(store)?;
    revoked_token_is_never_used(store)?;
    concurrent_mark_used_has_one_winner(store)?;
    revoke_single_token(store)?;
    revoke_family_scopes(store)?;
    expired_entries_are_never_valid(store)?;
    purge_removes_only_expired(store)?;
    Ok(())
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Builds a client record with a random `client_id`.
#[must_use]
pub fn sample_client() -> Client {
    let now = Utc::now();
    Client {
        client_id: unique("client"),
        client_type: ClientType::Confidential,
        secret_hash: Some(unique("secret-digest")),
        registration_token_hash: unique("rat-digest"),
        redirect_uris: vec!["https://app.example/cb".to_string()],
        grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
        response_types: vec![ResponseType::Code],
        scopes: Scopes::parse("openid offline_access"),
        client_name: Some("Conformance".to_string()),
        introspection_allowed: false,
        created_at: now,
        updated_at: now,
    }
}

/// Builds an unconsumed code expiring in `ttl_seconds`.
#[must_use]
pub fn sample_code(ttl_seconds: i64) -> AuthorizationCode {
    let now = Utc::now();
    AuthorizationCode {
        code_hash: unique("code"),
        client_id: "conformance-client".to_string(),
        redirect_uri: "https://app.example/cb".to_string(),
        scopes: Scopes::parse("openid offline_access"),
        subject: "subject-1".to_string(),
        nonce: Some("n-0S6_WzA2Mj".to_string()),
        code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string()),
        code_challenge_method: Some(idp_model::CodeChallengeMethod::S256),
        auth_time: Some(now),
        issued_at: now,
        expires_at: now + Duration::seconds(ttl_seconds),
        consumed: false,
        family_id: None,
    }
}

/// Builds an active token record in `family_id` expiring in `ttl_seconds`.
#[must_use]
pub fn sample_token(kind: TokenKind, family_id: &str, ttl_seconds: i64) -> TokenRecord {
    let now = Utc::now();
    TokenRecord {
        token_hash: unique("token"),
        kind,
        client_id: "conformance-client".to_string(),
        subject: "subject-1".to_string(),
        scopes: Scopes::parse("openid offline_access"),
        family_id: family_id.to_string(),
        jti: (kind == TokenKind::Access).then(|| unique("jti")),
        auth_time: Some(now),
        issued_at: now,
        expires_at: now + Duration::seconds(ttl_seconds),
        chain_expires_at: (kind == TokenKind::Refresh).then(|| now + Duration::seconds(ttl_seconds * 10)),
        used: false,
        revoked: false,
    }
}

/// Clients round-trip, duplicates are rejected and updates replace.
///
/// # Errors
///
/// Returns any backend error.
pub fn client_round_trip<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let client = sample_client();
    store.put_client(&client)?;

    let loaded = store.get_client(&client.client_id)?;
    assert_eq!(loaded.as_ref(), Some(&client), "client must round-trip unchanged");

    let duplicate = store.put_client(&client);
    assert!(
        matches!(duplicate, Err(ref e) if e.is_duplicate()),
        "duplicate client_id must be rejected, got {duplicate:?}"
    );

    let mut updated = client.clone();
    updated.redirect_uris.push("https://app.example/other".to_string());
    updated.introspection_allowed = true;
    store.update_client(&updated)?;
    assert_eq!(store.get_client(&client.client_id)?, Some(updated));

    let missing = store.update_client(&sample_client());
    assert!(
        matches!(missing, Err(ref e) if e.is_not_found()),
        "updating an unknown client must fail with NotFound, got {missing:?}"
    );

    assert!(store.get_client(&unique("absent"))?.is_none());
    Ok(())
}

/// Codes round-trip and duplicates are rejected.
///
/// # Errors
///
/// Returns any backend error.
pub fn code_round_trip<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let code = sample_code(60);
    store.put_code(&code)?;
    assert_eq!(store.get_code(&code.code_hash)?, Some(code.clone()));

    let duplicate = store.put_code(&code);
    assert!(
        matches!(duplicate, Err(ref e) if e.is_duplicate()),
        "duplicate code must be rejected, got {duplicate:?}"
    );

    assert!(store.get_code(&unique("absent"))?.is_none());
    Ok(())
}

/// A code is consumed once; later attempts see the winner's family.
///
/// # Errors
///
/// Returns any backend error.
pub fn consume_exactly_once<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let code = sample_code(60);
    store.put_code(&code)?;

    let family = unique("family");
    assert_eq!(store.mark_consumed(&code.code_hash, &family, &[])?, ConsumeOutcome::Consumed);

    let again = store.mark_consumed(&code.code_hash, &unique("family"), &[])?;
    assert_eq!(
        again,
        ConsumeOutcome::AlreadyConsumed {
            family_id: Some(family.clone())
        }
    );

    let stored = store.get_code(&code.code_hash)?;
    let stored = stored.ok_or_else(|| StorageError::Internal("consumed code vanished".to_string()))?;
    assert!(stored.consumed);
    assert_eq!(stored.family_id, Some(family));

    assert_eq!(
        store.mark_consumed(&unique("absent"), "f", &[])?,
        ConsumeOutcome::NotFound
    );
    Ok(())
}

/// Tokens passed to `mark_consumed` are stored only by the winning call.
///
/// # Errors
///
/// Returns any backend error.
pub fn consume_stores_tokens_atomically<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let code = sample_code(60);
    store.put_code(&code)?;

    let family = unique("family");
    let access = sample_token(TokenKind::Access, &family, 300);
    let refresh = sample_token(TokenKind::Refresh, &family, 1800);
    store.mark_consumed(&code.code_hash, &family, &[access.clone(), refresh.clone()])?;

    assert_eq!(store.get_token(&access.token_hash)?, Some(access));
    assert_eq!(store.get_token(&refresh.token_hash)?, Some(refresh));

    let loser_family = unique("family");
    let loser = sample_token(TokenKind::Access, &loser_family, 300);
    store.mark_consumed(&code.code_hash, &loser_family, std::slice::from_ref(&loser))?;
    assert!(
        store.get_token(&loser.token_hash)?.is_none(),
        "tokens of a losing consume must not be stored"
    );
    Ok(())
}

/// Of [`RACERS`] threads consuming one code, exactly one wins.
///
/// # Errors
///
/// Returns any backend error.
pub fn concurrent_consume_has_one_winner<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let code = sample_code(60);
    store.put_code(&code)?;

    let attempts: Vec<(String, TokenRecord)> = (0..RACERS)
        .map(|_| {
            let family = unique("family");
            let token = sample_token(TokenKind::Access, &family, 300);
            (family, token)
        })
        .collect();

    let barrier = Barrier::new(RACERS);
    let outcomes: Vec<StorageResult<ConsumeOutcome>> = std::thread::scope(|scope| {
        let handles: Vec<_> = attempts
            .iter()
            .map(|(family, token)| {
                let barrier = &barrier;
                let code_hash = code.code_hash.as_str();
                scope.spawn(move || {
                    barrier.wait();
                    store.mark_consumed(code_hash, family, std::slice::from_ref(token))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(StorageError::Internal("racer panicked".to_string())))
            })
            .collect()
    });

    let mut winners = Vec::new();
    for (index, outcome) in outcomes.into_iter().enumerate() {
        if outcome? == ConsumeOutcome::Consumed {
            winners.push(index);
        }
    }
    assert_eq!(winners.len(), 1, "exactly one concurrent consume must win");

    let winner = winners[0];
    for (index, (_, token)) in attempts.iter().enumerate() {
        let stored = store.get_token(&token.token_hash)?.is_some();
        assert_eq!(stored, index == winner, "only the winner's tokens may be stored");
    }
    Ok(())
}

/// A refresh token is used once; replacements are stored only by the winner.
///
/// # Errors
///
/// Returns any backend error.
pub fn mark_used_exactly_once<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let family = unique("family");
    let refresh = sample_token(TokenKind::Refresh, &family, 1800);
    store.put_token(&refresh)?;

    let next = sample_token(TokenKind::Refresh, &family, 1800);
    assert_eq!(
        store.mark_used(&refresh.token_hash, std::slice::from_ref(&next))?,
        UseOutcome::Used
    );
    assert!(store.get_token(&next.token_hash)?.is_some());

    let spare = sample_token(TokenKind::Refresh, &family, 1800);
    assert_eq!(
        store.mark_used(&refresh.token_hash, std::slice::from_ref(&spare))?,
        UseOutcome::AlreadyUsed
    );
    assert!(store.get_token(&spare.token_hash)?.is_none());

    let used = store.get_token(&refresh.token_hash)?;
    assert!(used.is_some_and(|t| t.used && !t.is_active_at(Utc::now())));

    assert_eq!(store.mark_used(&unique("absent"), &[])?, UseOutcome::NotFound);
    Ok(())
}

/// A revoked refresh token is never rotated.
///
/// # Errors
///
/// Returns any backend error.
pub fn revoked_token_is_never_used<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let family = unique("family");
    let refresh = sample_token(TokenKind::Refresh, &family, 1800);
    store.put_token(&refresh)?;
    assert!(store.revoke(&refresh.token_hash)?);

    let next = sample_token(TokenKind::Refresh, &family, 1800);
    assert_eq!(
        store.mark_used(&refresh.token_hash, std::slice::from_ref(&next))?,
        UseOutcome::Revoked
    );
    assert!(store.get_token(&next.token_hash)?.is_none());
    Ok(())
}

/// Of [`RACERS`] threads rotating one refresh token, exactly one wins.
///
/// # Errors
///
/// Returns any backend error.
pub fn concurrent_mark_used_has_one_winner<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let family = unique("family");
    let refresh = sample_token(TokenKind::Refresh, &family, 1800);
    store.put_token(&refresh)?;

    let replacements: Vec<TokenRecord> = (0..RACERS)
        .map(|_| sample_token(TokenKind::Refresh, &family, 1800))
        .collect();

    let barrier = Barrier::new(RACERS);
    let outcomes: Vec<StorageResult<UseOutcome>> = std::thread::scope(|scope| {
        let handles: Vec<_> = replacements
            .iter()
            .map(|replacement| {
                let barrier = &barrier;
                let token_hash = refresh.token_hash.as_str();
                scope.spawn(move || {
                    barrier.wait();
                    store.mark_used(token_hash, std::slice::from_ref(replacement))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(StorageError::Internal("racer panicked".to_string())))
            })
            .collect()
    });

    let mut used = 0;
    let mut already_used = 0;
    for outcome in outcomes {
        match outcome? {
            UseOutcome::Used => used += 1,
            UseOutcome::AlreadyUsed => already_used += 1,
            other => panic!("unexpected outcome in rotation race: {other:?}"),
        }
    }
    assert_eq!(used, 1, "exactly one concurrent rotation must win");
    assert_eq!(already_used, RACERS - 1);

    let mut stored = 0;
    for replacement in &replacements {
        if store.get_token(&replacement.token_hash)?.is_some() {
            stored += 1;
        }
    }
    assert_eq!(stored, 1, "only the winner's replacement may be stored");
    Ok(())
}

/// Revoking one token leaves its family alone; revoking twice is harmless.
///
/// # Errors
///
/// Returns any backend error.
pub fn revoke_single_token<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let family = unique("family");
    let access = sample_token(TokenKind::Access, &family, 300);
    let sibling = sample_token(TokenKind::Access, &family, 300);
    store.put_token(&access)?;
    store.put_token(&sibling)?;

    assert!(store.revoke(&access.token_hash)?);
    assert!(store.revoke(&access.token_hash)?, "revoking twice must still succeed");
    assert!(!store.revoke(&unique("absent"))?);

    assert!(store.get_token(&access.token_hash)?.is_some_and(|t| t.revoked));
    assert!(store.get_token(&sibling.token_hash)?.is_some_and(|t| !t.revoked));
    Ok(())
}

/// Family revocation honours its scope and leaves other families untouched.
///
/// # Errors
///
/// Returns any backend error.
pub fn revoke_family_scopes<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let family = unique("family");
    let access = sample_token(TokenKind::Access, &family, 300);
    let refresh = sample_token(TokenKind::Refresh, &family, 1800);
    let bystander = sample_token(TokenKind::Refresh, &unique("family"), 1800);
    for token in [&access, &refresh, &bystander] {
        store.put_token(token)?;
    }

    assert_eq!(store.revoke_family(&family, FamilyRevocation::RefreshOnly)?, 1);
    assert!(store.get_token(&access.token_hash)?.is_some_and(|t| !t.revoked));
    assert!(store.get_token(&refresh.token_hash)?.is_some_and(|t| t.revoked));

    assert_eq!(store.revoke_family(&family, FamilyRevocation::All)?, 1);
    assert!(store.get_token(&access.token_hash)?.is_some_and(|t| t.revoked));
    assert_eq!(store.revoke_family(&family, FamilyRevocation::All)?, 0);

    assert!(store.get_token(&bystander.token_hash)?.is_some_and(|t| !t.revoked));
    Ok(())
}

/// Expired records come back flagged as expired, never as valid.
///
/// # Errors
///
/// Returns any backend error.
pub fn expired_entries_are_never_valid<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let now = Utc::now();

    let code = sample_code(-5);
    store.put_code(&code)?;
    if let Some(stored) = store.get_code(&code.code_hash)? {
        assert!(stored.is_expired_at(now), "an expired code must never read as valid");
    }

    let token = sample_token(TokenKind::Refresh, &unique("family"), -5);
    store.put_token(&token)?;
    if let Some(stored) = store.get_token(&token.token_hash)? {
        assert!(!stored.is_active_at(now), "an expired token must never read as active");
    }
    Ok(())
}

/// Purging removes expired codes and tokens and keeps live ones.
///
/// # Errors
///
/// Returns any backend error.
pub fn purge_removes_only_expired<S: Store + ?Sized>(store: &S) -> StorageResult<()> {
    let expired_code = sample_code(-5);
    let live_code = sample_code(60);
    store.put_code(&expired_code)?;
    store.put_code(&live_code)?;

    let family = unique("family");
    let expired_token = sample_token(TokenKind::Access, &family, -5);
    let live_token = sample_token(TokenKind::Access, &family, 300);
    store.put_token(&expired_token)?;
    store.put_token(&live_token)?;

    let now = Utc::now();
    assert!(store.purge_expired_codes(now)? >= 1);
    assert!(store.purge_expired_tokens(now)? >= 1);

    assert!(store.get_code(&expired_code.code_hash)?.is_none());
    assert!(store.get_code(&live_code.code_hash)?.is_some());
    assert!(store.get_token(&expired_token.token_hash)?.is_none());
    assert!(store.get_token(&live_token.token_hash)?.is_some());
    Ok(())
}
