//! Signing key rotation integration tests.

use std::sync::Barrier;
use std::thread;

use chrono::{Duration, Utc};
use idp_core::EventType;
use pretty_assertions::assert_eq;

use crate::common::{BACKENDS, Backend, TestEnv, credentials};

fn kid_of(token: &str) -> anyhow::Result<String> {
    jsonwebtoken::decode_header(token)?
        .kid
        .ok_or_else(|| anyhow::anyhow!("token has no kid"))
}

/// Tests that tokens issued before a rotation keep verifying during the
/// grace period while new tokens use the new key.
#[test]
fn test_tokens_survive_rotation() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid offline_access")?;
        let creds = credentials(&app);

        let before = env.login(&app, "openid offline_access")?;
        let old_kid = kid_of(&before.access_token)?;

        let current = env.provider.rotate_keys()?;
        assert_ne!(current.kid(), old_kid);

        let issuer = env.provider.tokens().issuer();
        assert!(issuer.verify_access_token(&before.access_token).is_ok());
        let id_token = before.id_token.as_deref().ok_or_else(|| anyhow::anyhow!("no id_token"))?;
        assert!(issuer.verify_id_token(id_token, &app.client.client_id).is_ok());

        let refresh = before.refresh_token.as_deref().ok_or_else(|| anyhow::anyhow!("no refresh"))?;
        let after = env.refresh(&creds, refresh)?;
        assert_eq!(kid_of(&after.access_token)?, current.kid());

        let jwks = env.provider.jwks();
        let published: Vec<&str> = jwks.key_ids().collect();
        assert!(published.contains(&old_kid.as_str()));
        assert!(published.contains(&current.kid()));

        assert_eq!(env.events.events_of(EventType::KeyRotated).len(), 1);
    }
    Ok(())
}

/// Tests that a retired key stays published at least as long as the tokens
/// it signed remain valid, and disappears afterwards.
#[test]
fn test_retired_key_outlives_its_tokens() -> anyhow::Result<()> {
    let env = TestEnv::new(Backend::Memory)?;
    let app = env.register_confidential("openid")?;
    let tokens = env.login(&app, "openid")?;
    let old_kid = kid_of(&tokens.access_token)?;

    let rotated_at = Utc::now();
    env.keys.rotate_at(rotated_at)?;

    let claims = env.provider.tokens().issuer().verify_access_token(&tokens.access_token)?;
    let token_expiry = chrono::DateTime::from_timestamp(claims.exp, 0)
        .ok_or_else(|| anyhow::anyhow!("bad exp"))?;
    assert!(env.keys.public_key_set_at(token_expiry).find_key(&old_kid).is_some());

    let past_grace = rotated_at + env.provider.config().key_rotation_grace_duration() + Duration::seconds(1);
    assert!(env.keys.public_key_set_at(past_grace).find_key(&old_kid).is_none());
    assert_eq!(env.keys.prune_retired(past_grace), 1);
    Ok(())
}

/// Tests that every token set issued while keys rotate concurrently is
/// signed by a single key and verifies.
#[test]
fn test_rotation_concurrent_with_issuance() -> anyhow::Result<()> {
    const ISSUERS: usize = 4;
    const LOGINS: usize = 8;

    let env = TestEnv::new(Backend::Memory)?;
    let app = env.register_confidential("openid")?;
    let barrier = Barrier::new(ISSUERS + 1);
    let (env_ref, app_ref, barrier) = (&env, &app, &barrier);

    let results = thread::scope(|scope| {
        let rotator = scope.spawn(move || -> anyhow::Result<()> {
            barrier.wait();
            for _ in 0..3 {
                env_ref.provider.rotate_keys()?;
            }
            Ok(())
        });

        let workers: Vec<_> = (0..ISSUERS)
            .map(|_| {
                scope.spawn(move || {
                    barrier.wait();
                    (0..LOGINS)
                        .map(|_| env_ref.login(app_ref, "openid"))
                        .collect::<anyhow::Result<Vec<_>>>()
                })
            })
            .collect();

        let issued: Vec<_> = workers.into_iter().map(|w| w.join()).collect();
        (rotator.join(), issued)
    });

    let (rotator, issued) = results;
    rotator.map_err(|_| anyhow::anyhow!("rotator panicked"))??;

    let issuer = env.provider.tokens().issuer();
    for worker in issued {
        let sets = worker.map_err(|_| anyhow::anyhow!("issuer panicked"))??;
        for set in sets {
            let id_token = set.id_token.as_deref().ok_or_else(|| anyhow::anyhow!("no id_token"))?;
            assert_eq!(kid_of(&set.access_token)?, kid_of(id_token)?);
            issuer.verify_access_token(&set.access_token)?;
            issuer.verify_id_token(id_token, &app.client.client_id)?;
        }
    }
    Ok(())
}
