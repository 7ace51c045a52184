//! Authorization code flow integration tests.

use std::sync::Arc;

use chrono::{Duration, Utc};
use idp_core::{EventType, ProviderConfig};
use idp_model::{ClientMetadata, CodeChallengeMethod};
use idp_protocol_oidc::{
    AuthorizationRequest, AuthorizationResponse, AuthorizationState, ClientCredentials, ConsentDecision,
    IntrospectionRequest, RegistrationError,
};
use idp_storage::Store;
use pretty_assertions::assert_eq;
use url::Url;

use crate::common::{
    BACKENDS, Backend, CHALLENGE, FailingStore, REDIRECT_URI, TestEnv, VERIFIER, approve_all, code_from,
    credentials, exchange_request,
};

/// Tests the full code flow: registration, authorization, exchange and
/// verification of both signed tokens.
#[test]
fn test_authorization_code_flow_with_pkce() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid profile offline_access")?;
        let secret = app.client_secret.clone().ok_or_else(|| anyhow::anyhow!("no secret"))?;

        let request = AuthorizationRequest::code(&app.client.client_id, REDIRECT_URI)
            .with_scope("openid profile offline_access")
            .with_state("state-123")
            .with_nonce("nonce-456")
            .with_pkce(CHALLENGE, CodeChallengeMethod::S256);
        let response = env
            .provider
            .authorization()
            .authorize(&request, approve_all("openid profile offline_access"))?;
        assert_eq!(response.outcome(), AuthorizationState::CodeIssued);

        let redirect = response.to_redirect_url()?;
        let code = redirect
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| anyhow::anyhow!("no code in redirect"))?;
        assert!(redirect.query_pairs().any(|(k, v)| k == "state" && v == "state-123"));

        let tokens = env.exchange(&ClientCredentials::post(&app.client.client_id, &secret), &code)?;
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.refresh_token.is_some(), "{backend:?}");

        let issuer = env.provider.tokens().issuer();
        let access = issuer.verify_access_token(&tokens.access_token)?;
        assert_eq!(access.sub, "alice");
        assert_eq!(access.client_id, app.client.client_id);

        let id_token = tokens.id_token.as_deref().ok_or_else(|| anyhow::anyhow!("no id_token"))?;
        let id = issuer.verify_id_token(id_token, &app.client.client_id)?;
        assert_eq!(id.nonce.as_deref(), Some("nonce-456"));
        assert!(id.auth_time.is_some());

        let kid = jsonwebtoken::decode_header(&tokens.access_token)?
            .kid
            .ok_or_else(|| anyhow::anyhow!("no kid"))?;
        assert!(env.provider.jwks().find_key(&kid).is_some());

        assert_eq!(env.events.events_of(EventType::CodeIssued).len(), 1);
        assert_eq!(env.events.events_of(EventType::CodeToToken).len(), 1);
    }
    Ok(())
}

/// Tests that a public client completes the flow with `none` authentication.
#[test]
fn test_public_client_flow() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let spa = env.register_public("openid")?;
        assert!(spa.client_secret.is_none());

        let tokens = env.login(&spa, "openid")?;
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.id_token.is_some());
    }
    Ok(())
}

/// Tests that an authorization code can be redeemed once, and that a replay
/// revokes what the first redemption issued.
#[test]
fn test_code_is_single_use() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid offline_access")?;
        let creds = credentials(&app);

        let code = env.authorize(&app.client.client_id, "openid offline_access")?;
        let tokens = env.exchange(&creds, &code)?;

        let replay = env.exchange(&creds, &code).unwrap_err();
        assert_eq!(replay.error_code(), "invalid_grant");

        let introspection = env.provider.tokens().introspect(&IntrospectionRequest {
            credentials: creds.clone(),
            token: tokens.access_token.clone(),
            token_type_hint: None,
        })?;
        assert!(!introspection.active, "{backend:?}");

        let refresh = tokens.refresh_token.as_deref().ok_or_else(|| anyhow::anyhow!("no refresh"))?;
        assert_eq!(env.refresh(&creds, refresh).unwrap_err().error_code(), "invalid_grant");

        let replays = env.events.events_of(EventType::CodeReplayDetected);
        assert_eq!(replays.len(), 1);
    }
    Ok(())
}

/// Tests that every code-binding failure is an undifferentiated `invalid_grant`.
#[test]
fn test_code_binding_failures() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid")?;
        let other = env.register_confidential("openid")?;
        let creds = credentials(&app);

        let code = env.authorize(&app.client.client_id, "openid")?;

        let mut wrong_verifier = exchange_request(&creds, &code);
        wrong_verifier.code_verifier = Some("x".repeat(43));
        let mut no_verifier = exchange_request(&creds, &code);
        no_verifier.code_verifier = None;
        let mut wrong_redirect = exchange_request(&creds, &code);
        wrong_redirect.redirect_uri = "https://app.example.com/other".to_string();
        let wrong_client = exchange_request(&credentials(&other), &code);

        for request in [wrong_verifier, no_verifier, wrong_redirect, wrong_client] {
            let err = env.provider.tokens().exchange_code(&request).unwrap_err();
            assert_eq!(err.error_code(), "invalid_grant");
        }

        // Failed attempts do not consume the code.
        assert!(env.exchange(&creds, &code).is_ok());
    }
    Ok(())
}

/// Tests that an expired code is rejected even though it was never used.
#[test]
fn test_expired_code_is_rejected() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid")?;

        env.seed_code(&app.client, "expired-code", Utc::now() - Duration::seconds(1))?;
        let err = env.exchange(&credentials(&app), "expired-code").unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
    }
    Ok(())
}

/// Tests that an untrusted redirect URI is never redirected to.
#[test]
fn test_redirect_uri_mismatch_is_not_redirected() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_public("openid")?;

        let request = AuthorizationRequest::code(&app.client.client_id, "https://attacker.example/cb")
            .with_scope("openid")
            .with_pkce(CHALLENGE, CodeChallengeMethod::S256);
        let err = env
            .provider
            .authorization()
            .authorize(&request, approve_all("openid"))
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");

        let unknown = AuthorizationRequest::code("no-such-client", REDIRECT_URI).with_scope("openid");
        assert!(env.provider.authorization().authorize(&unknown, approve_all("openid")).is_err());
    }
    Ok(())
}

/// Tests that a client lookup outage during authorization surfaces as a
/// retryable error and is never sent to the redirect URI.
#[test]
fn test_client_lookup_outage_is_not_redirected() -> anyhow::Result<()> {
    let store = Arc::new(FailingStore::default());
    let env = TestEnv::from_store(
        Backend::Memory,
        store.clone() as Arc<dyn Store>,
        ProviderConfig::default(),
        None,
    )?;
    let app = env.register_confidential("openid")?;

    store.fail_client_reads(true);
    let request = AuthorizationRequest::code(&app.client.client_id, REDIRECT_URI)
        .with_scope("openid")
        .with_state("af0ifjsldkj")
        .with_pkce(CHALLENGE, CodeChallengeMethod::S256);
    let err = env
        .provider
        .authorization()
        .authorize(&request, approve_all("openid"))
        .unwrap_err();
    assert_eq!(err.error_code(), "temporarily_unavailable");
    assert!(err.is_retryable());
    assert!(env.events.events_of(EventType::CodeIssued).is_empty());

    store.fail_client_reads(false);
    assert!(env.authorize(&app.client.client_id, "openid").is_ok());
    Ok(())
}

/// Tests that validation errors after redirect URI validation are reported
/// on the redirect with the original state.
#[test]
fn test_redirectable_errors_echo_state() -> anyhow::Result<()> {
    let env = TestEnv::new(crate::common::Backend::Memory)?;
    let app = env.register_public("openid profile")?;

    let escalated = AuthorizationRequest::code(&app.client.client_id, REDIRECT_URI)
        .with_scope("openid email")
        .with_state("keep-me")
        .with_pkce(CHALLENGE, CodeChallengeMethod::S256);
    let response = env
        .provider
        .authorization()
        .authorize(&escalated, approve_all("openid email"))?;
    let url: Url = response.to_redirect_url()?;
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("error".to_string(), "invalid_scope".to_string())));
    assert!(pairs.contains(&("state".to_string(), "keep-me".to_string())));

    let missing_pkce = AuthorizationRequest::code(&app.client.client_id, REDIRECT_URI)
        .with_scope("openid")
        .with_state("keep-me");
    let response = env
        .provider
        .authorization()
        .authorize(&missing_pkce, approve_all("openid"))?;
    assert!(matches!(
        response,
        AuthorizationResponse::Error { error: "invalid_request", .. }
    ));

    let valid = AuthorizationRequest::code(&app.client.client_id, REDIRECT_URI)
        .with_scope("openid")
        .with_state("keep-me")
        .with_pkce(CHALLENGE, CodeChallengeMethod::S256);
    let response = env.provider.authorization().authorize(&valid, ConsentDecision::Denied)?;
    assert!(matches!(
        response,
        AuthorizationResponse::Error { error: "access_denied", .. }
    ));
    assert!(code_from(&response).is_err());
    Ok(())
}

/// Tests that the code persists only the approved subset of requested scopes.
#[test]
fn test_partial_consent_narrows_scope() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid profile email")?;

        let request = AuthorizationRequest::code(&app.client.client_id, REDIRECT_URI)
            .with_scope("openid profile email")
            .with_pkce(CHALLENGE, CodeChallengeMethod::S256);
        let response = env
            .provider
            .authorization()
            .authorize(&request, approve_all("openid email"))?;
        let code = code_from(&response)?;

        let tokens = env.exchange(&credentials(&app), &code)?;
        assert_eq!(tokens.scope.as_deref(), Some("email openid"));
    }
    Ok(())
}

/// Tests that registration rejects unsafe redirect URIs and that updates
/// require the registration access token.
#[test]
fn test_client_registration_rules() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let registry = env.provider.registry();

        for uri in ["http://app.example.com/cb", "https://app.example.com/cb#frag", "cb"] {
            let err = registry.register(&ClientMetadata::new(uri)).unwrap_err();
            assert!(matches!(err, RegistrationError::InvalidRedirectUri(_)), "{uri}");
        }

        let app = env.register_confidential("openid profile")?;
        let stored = registry.get(&app.client.client_id)?;
        assert_ne!(stored.secret_hash.as_deref(), app.client_secret.as_deref());

        let update = ClientMetadata::new(REDIRECT_URI)
            .with_redirect_uri("https://app.example.com/second")
            .with_scope("openid profile");
        let err = registry
            .update(&app.client.client_id, &update, "not-the-token")
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_token");

        let updated = registry.update(&app.client.client_id, &update, &app.registration_access_token)?;
        assert_eq!(updated.redirect_uris.len(), 2);
        assert_eq!(env.events.events_of(EventType::ClientUpdated).len(), 1);
    }
    Ok(())
}

/// Tests the discovery document against the provider configuration.
#[test]
fn test_discovery_document() -> anyhow::Result<()> {
    let env = TestEnv::new(crate::common::Backend::Memory)?;
    let metadata = env.provider.discovery();

    assert_eq!(metadata.issuer, env.provider.config().issuer);
    assert_eq!(metadata.id_token_signing_alg_values_supported, vec!["ES384".to_string()]);
    assert!(metadata.scopes_supported.iter().any(|s| s == "openid"));

    let json = serde_json_value(&metadata)?;
    assert_eq!(json["code_challenge_methods_supported"][0], "S256");

    let jwks = env.provider.jwks();
    assert_eq!(jwks.keys.len(), 1);
    assert_eq!(jwks.keys[0].alg, "ES384");
    Ok(())
}

/// Tests the RFC 7636 Appendix B vector through the public verifier.
#[test]
fn test_pkce_reference_vector() {
    use idp_protocol_oidc::PkceVerifier;

    assert_eq!(
        PkceVerifier::derive_challenge(VERIFIER, CodeChallengeMethod::S256),
        CHALLENGE
    );
    assert!(PkceVerifier::matches(CHALLENGE, CodeChallengeMethod::S256, VERIFIER));
}

fn serde_json_value<T: serde::Serialize>(value: &T) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}
