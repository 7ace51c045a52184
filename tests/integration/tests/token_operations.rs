//! Token operation integration tests (refresh, introspection, revocation).

use std::sync::Arc;

use chrono::{Duration, Utc};
use idp_core::{EventType, ProviderConfig, RevocationCascade};
use idp_model::{ClientMetadata, Scopes};
use idp_protocol_oidc::{
    ClientCredentials, IntrospectionRequest, IntrospectionResponse, RefreshRequest, RevocationRequest, TokenRequest,
};
use idp_storage::{Store, TokenStore};
use pretty_assertions::assert_eq;

use crate::common::{
    BACKENDS, Backend, FailingStore, REDIRECT_URI, TestEnv, VERIFIER, credentials, refresh_request,
};

fn introspect(env: &TestEnv, caller: &ClientCredentials, token: &str) -> anyhow::Result<IntrospectionResponse> {
    Ok(env.provider.tokens().introspect(&IntrospectionRequest {
        credentials: caller.clone(),
        token: token.to_string(),
        token_type_hint: None,
    })?)
}

fn revoke(env: &TestEnv, caller: &ClientCredentials, token: &str, hint: Option<&str>) -> anyhow::Result<()> {
    env.provider.tokens().revoke(&RevocationRequest {
        credentials: caller.clone(),
        token: token.to_string(),
        token_type_hint: hint.map(String::from),
    })?;
    Ok(())
}

/// Tests that refreshing rotates the token and that reusing the old one
/// revokes the whole chain.
#[test]
fn test_refresh_rotation_and_reuse_detection() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid offline_access")?;
        let creds = credentials(&app);

        let first = env.login(&app, "openid offline_access")?;
        let r1 = first.refresh_token.ok_or_else(|| anyhow::anyhow!("no refresh token"))?;

        let second = env.refresh(&creds, &r1)?;
        let r2 = second.refresh_token.ok_or_else(|| anyhow::anyhow!("no rotated token"))?;
        assert_ne!(r1, r2);
        assert_eq!(env.record(&r1)?.family_id, env.record(&r2)?.family_id);

        let reuse = env.refresh(&creds, &r1).unwrap_err();
        assert_eq!(reuse.error_code(), "invalid_grant");

        let chain = env.refresh(&creds, &r2).unwrap_err();
        assert_eq!(chain.error_code(), "invalid_grant", "{backend:?}");

        assert!(!introspect(&env, &creds, &second.access_token)?.active);
        assert_eq!(env.events.events_of(EventType::RefreshTokenReuseDetected).len(), 1);
    }
    Ok(())
}

/// Tests that refresh can narrow but never widen the original grant.
#[test]
fn test_refresh_scope_rules() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid profile email offline_access")?;
        let creds = credentials(&app);

        let tokens = env.login(&app, "openid profile offline_access")?;
        let refresh = tokens.refresh_token.ok_or_else(|| anyhow::anyhow!("no refresh token"))?;

        let escalate = RefreshRequest {
            scope: Some("openid email".to_string()),
            ..refresh_request(&creds, &refresh)
        };
        assert_eq!(
            env.provider.tokens().refresh(&escalate).unwrap_err().error_code(),
            "invalid_grant"
        );

        let narrow = RefreshRequest {
            scope: Some("openid".to_string()),
            ..refresh_request(&creds, &refresh)
        };
        let narrowed = env.provider.tokens().refresh(&narrow)?;
        assert_eq!(narrowed.scope.as_deref(), Some("openid"));

        let access = env.provider.tokens().issuer().verify_access_token(&narrowed.access_token)?;
        assert_eq!(access.scope, "openid");
    }
    Ok(())
}

/// Tests that a rotated refresh token never outlives the chain.
#[test]
fn test_refresh_chain_lifetime_is_fixed() -> anyhow::Result<()> {
    let config = ProviderConfig {
        refresh_token_lifespan: 600,
        refresh_chain_max_lifespan: 900,
        ..ProviderConfig::default()
    };
    for backend in BACKENDS {
        let env = TestEnv::with_config(backend, config.clone())?;
        let app = env.register_confidential("openid offline_access")?;
        let creds = credentials(&app);

        let r1 = env
            .login(&app, "openid offline_access")?
            .refresh_token
            .ok_or_else(|| anyhow::anyhow!("no refresh token"))?;
        let first = env.record(&r1)?;
        let chain = first.chain_expires_at.ok_or_else(|| anyhow::anyhow!("no chain expiry"))?;
        assert!(chain - first.issued_at <= Duration::seconds(900));

        let r2 = env
            .refresh(&creds, &r1)?
            .refresh_token
            .ok_or_else(|| anyhow::anyhow!("no rotated token"))?;
        let second = env.record(&r2)?;
        assert_eq!(second.chain_expires_at, Some(chain));
        assert!(second.expires_at <= chain);
    }
    Ok(())
}

/// Tests introspection for the owner, a foreign client and a trusted
/// resource server.
#[test]
fn test_introspection_visibility() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid offline_access")?;
        let stranger = env.register_confidential("openid")?;
        let resource_server = env.provider.registry().register(
            &ClientMetadata::new(REDIRECT_URI)
                .with_scope("openid")
                .with_introspection(),
        )?;

        let tokens = env.login(&app, "openid offline_access")?;

        let owner = introspect(&env, &credentials(&app), &tokens.access_token)?;
        assert!(owner.active);
        assert_eq!(owner.sub.as_deref(), Some("alice"));
        assert_eq!(owner.scope.as_deref(), Some("offline_access openid"));

        let foreign = introspect(&env, &credentials(&stranger), &tokens.access_token)?;
        assert_eq!(foreign, IntrospectionResponse::inactive());

        let refresh = tokens.refresh_token.as_deref().ok_or_else(|| anyhow::anyhow!("no refresh"))?;
        let trusted = introspect(&env, &credentials(&resource_server), refresh)?;
        assert!(trusted.active);
        assert_eq!(trusted.client_id.as_deref(), Some(app.client.client_id.as_str()));

        let unknown = introspect(&env, &credentials(&app), "not-a-token")?;
        assert_eq!(serde_json::to_string(&unknown)?, r#"{"active":false}"#);

        let err = env
            .provider
            .tokens()
            .introspect(&IntrospectionRequest {
                credentials: ClientCredentials::post(&app.client.client_id, "wrong"),
                token: tokens.access_token.clone(),
                token_type_hint: None,
            })
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_client");
    }
    Ok(())
}

/// Tests that expired access and refresh tokens introspect as inactive,
/// exactly like unknown and revoked ones, and that an expired refresh token
/// cannot be redeemed.
#[test]
fn test_expired_tokens_are_inactive() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid offline_access")?;
        let creds = credentials(&app);
        let tokens = env.login(&app, "openid offline_access")?;
        let refresh = tokens.refresh_token.as_deref().ok_or_else(|| anyhow::anyhow!("no refresh"))?;
        let now = Utc::now();

        // An access token signed two hours ago, recorded with its real expiry.
        let issuer = env.provider.tokens().issuer();
        let stale = issuer.issue_access_token(
            &issuer.signer(),
            "alice",
            &app.client.client_id,
            &Scopes::parse("openid"),
            None,
            now - Duration::hours(2),
        )?;
        let mut stale_record = env.record(&tokens.access_token)?;
        stale_record.token_hash = idp_crypto::digest_b64url(&stale.token);
        stale_record.jti = Some(stale.claims.jti.clone());
        stale_record.issued_at = now - Duration::hours(2);
        stale_record.expires_at = stale.expires_at;
        env.store.put_token(&stale_record)?;

        // A refresh token in the same family whose lifetime has run out.
        let expired_refresh = format!("expired-refresh-{backend:?}");
        let mut expired_record = env.record(refresh)?;
        expired_record.token_hash = idp_crypto::digest_b64url(&expired_refresh);
        expired_record.issued_at = now - Duration::hours(1);
        expired_record.expires_at = now - Duration::minutes(1);
        env.store.put_token(&expired_record)?;

        assert_eq!(introspect(&env, &creds, &stale.token)?, IntrospectionResponse::inactive());
        assert_eq!(introspect(&env, &creds, &expired_refresh)?, IntrospectionResponse::inactive());

        let err = env.refresh(&creds, &expired_refresh).unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant", "{backend:?}");

        // Expiry is not reuse: the live chain is untouched.
        assert!(env.events.events_of(EventType::RefreshTokenReuseDetected).is_empty());
        assert!(env.refresh(&creds, refresh).is_ok(), "{backend:?}");
    }
    Ok(())
}

/// Tests that revoking an access token leaves the rest of the grant alone.
#[test]
fn test_revoke_access_token_only() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid offline_access")?;
        let creds = credentials(&app);

        let tokens = env.login(&app, "openid offline_access")?;
        revoke(&env, &creds, &tokens.access_token, Some("access_token"))?;

        assert!(!introspect(&env, &creds, &tokens.access_token)?.active);
        let refresh = tokens.refresh_token.as_deref().ok_or_else(|| anyhow::anyhow!("no refresh"))?;
        assert!(env.refresh(&creds, refresh).is_ok());
    }
    Ok(())
}

/// Tests each revocation cascade policy on every backend.
#[test]
fn test_revoke_refresh_token_cascade() -> anyhow::Result<()> {
    for backend in BACKENDS {
        for (cascade, access_survives) in [
            (RevocationCascade::Family, false),
            (RevocationCascade::RefreshChain, true),
            (RevocationCascade::TokenOnly, true),
        ] {
            let config = ProviderConfig {
                revocation_cascade: cascade,
                ..ProviderConfig::default()
            };
            let env = TestEnv::with_config(backend, config)?;
            let app = env.register_confidential("openid offline_access")?;
            let creds = credentials(&app);

            let tokens = env.login(&app, "openid offline_access")?;
            let refresh = tokens.refresh_token.ok_or_else(|| anyhow::anyhow!("no refresh"))?;
            revoke(&env, &creds, &refresh, Some("refresh_token"))?;

            assert_eq!(env.refresh(&creds, &refresh).unwrap_err().error_code(), "invalid_grant");
            assert_eq!(
                introspect(&env, &creds, &tokens.access_token)?.active,
                access_survives,
                "{backend:?} {cascade}"
            );
        }
    }
    Ok(())
}

/// Tests that revocation always succeeds for unknown or foreign tokens but
/// requires caller authentication.
#[test]
fn test_revocation_is_silent_for_unknown_tokens() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid")?;
        let stranger = env.register_confidential("openid")?;
        let tokens = env.login(&app, "openid")?;

        revoke(&env, &credentials(&app), "never-issued", None)?;
        revoke(&env, &credentials(&stranger), &tokens.access_token, None)?;
        assert!(introspect(&env, &credentials(&app), &tokens.access_token)?.active);

        // Revoking twice is fine.
        revoke(&env, &credentials(&app), &tokens.access_token, None)?;
        revoke(&env, &credentials(&app), &tokens.access_token, None)?;

        let err = env
            .provider
            .tokens()
            .revoke(&RevocationRequest {
                credentials: ClientCredentials::post(&app.client.client_id, "wrong"),
                token: tokens.access_token.clone(),
                token_type_hint: None,
            })
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_client");
    }
    Ok(())
}

/// Tests the raw token endpoint dispatch.
#[test]
fn test_token_request_dispatch() -> anyhow::Result<()> {
    let env = TestEnv::new(Backend::Memory)?;
    let app = env.register_confidential("openid offline_access")?;
    let creds = credentials(&app);
    let code = env.authorize(&app.client.client_id, "openid offline_access")?;

    let tokens = env.provider.tokens().token(TokenRequest {
        code: Some(code),
        redirect_uri: Some(REDIRECT_URI.to_string()),
        code_verifier: Some(VERIFIER.to_string()),
        ..TokenRequest::new("authorization_code", creds.clone())
    })?;

    let refreshed = env.provider.tokens().token(TokenRequest {
        refresh_token: tokens.refresh_token,
        ..TokenRequest::new("refresh_token", creds.clone())
    })?;
    assert!(refreshed.refresh_token.is_some());

    let err = env
        .provider
        .tokens()
        .token(TokenRequest::new("client_credentials", creds))
        .unwrap_err();
    assert_eq!(err.error_code(), "unsupported_grant_type");
    Ok(())
}

/// Tests that a failed containment is reported as an infrastructure error
/// instead of a quiet `invalid_grant`.
#[test]
fn test_failed_containment_propagates() -> anyhow::Result<()> {
    let store = Arc::new(FailingStore::default());
    let env = TestEnv::from_store(
        Backend::Memory,
        store.clone() as Arc<dyn Store>,
        ProviderConfig::default(),
        None,
    )?;
    let app = env.register_confidential("openid offline_access")?;
    let creds = credentials(&app);

    let code = env.authorize(&app.client.client_id, "openid offline_access")?;
    let tokens = env.exchange(&creds, &code)?;

    store.fail_family_revocation(true);

    let replay = env.exchange(&creds, &code).unwrap_err();
    assert!(replay.is_infrastructure());
    assert!(replay.is_retryable());
    assert_ne!(replay.error_code(), "invalid_grant");

    let refresh = tokens.refresh_token.ok_or_else(|| anyhow::anyhow!("no refresh"))?;
    let r2 = env
        .refresh(&creds, &refresh)?
        .refresh_token
        .ok_or_else(|| anyhow::anyhow!("no rotated token"))?;
    let reuse = env.refresh(&creds, &refresh).unwrap_err();
    assert!(reuse.is_infrastructure());

    // Once the store recovers, detection completes and the chain dies.
    store.fail_family_revocation(false);
    assert_eq!(env.refresh(&creds, &refresh).unwrap_err().error_code(), "invalid_grant");
    assert_eq!(env.refresh(&creds, &r2).unwrap_err().error_code(), "invalid_grant");
    Ok(())
}

/// Tests that a storage outage is never disguised as a grant error.
#[test]
fn test_storage_outage_is_not_invalid_grant() -> anyhow::Result<()> {
    let store = Arc::new(FailingStore::default());
    let env = TestEnv::from_store(
        Backend::Memory,
        store.clone() as Arc<dyn Store>,
        ProviderConfig::default(),
        None,
    )?;
    let app = env.register_confidential("openid")?;
    let code = env.authorize(&app.client.client_id, "openid")?;

    store.fail_code_reads(true);
    let err = env.exchange(&credentials(&app), &code).unwrap_err();
    assert_eq!(err.error_code(), "temporarily_unavailable");
    assert_eq!(err.http_status(), 503);

    store.fail_code_reads(false);
    assert!(env.exchange(&credentials(&app), &code).is_ok());
    Ok(())
}

/// Tests that the sweep removes expired entries only.
#[test]
fn test_purge_expired() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid")?;

        env.seed_code(&app.client, "stale", Utc::now() - Duration::seconds(5))?;
        let live = env.authorize(&app.client.client_id, "openid")?;
        let tokens = env.exchange(&credentials(&app), &live)?;

        let report = env.provider.purge_expired(Utc::now())?;
        assert_eq!(report.codes, 1, "{backend:?}");
        assert_eq!(report.tokens, 0);
        assert!(introspect(&env, &credentials(&app), &tokens.access_token)?.active);

        let later = Utc::now() + Duration::days(2);
        let report = env.provider.purge_expired(later)?;
        assert_eq!(report.tokens, 1);
        assert!(!introspect(&env, &credentials(&app), &tokens.access_token)?.active);
    }
    Ok(())
}
