//! Token Engine: code exchange, refresh rotation, introspection and
//! revocation.
//!
//! Every token minted for one grant is signed with one snapshot of the
//! current key and committed to the store in the same atomic step that
//! consumes the code or uses the refresh token. A loser of that race is
//! treated as a replay.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use idp_core::event::EventBuilder;
use idp_core::{EventListener, EventType, ProviderConfig, RevocationCascade};
use idp_crypto::digest_b64url;
use idp_crypto::random::generate_refresh_token;
use idp_model::types::scopes;
use idp_model::{Client, GrantType, Scopes, TokenKind, TokenRecord};
use idp_storage::{ConsumeOutcome, FamilyRevocation, Store, UseOutcome};
use uuid::Uuid;

use crate::client_auth::{ClientCredentials, authenticate_client};
use crate::error::{OidcError, OidcResult};
use crate::keys::SigningKeyEntry;
use crate::pkce::PkceVerifier;
use crate::token::{IntrospectionResponse, TokenIssuer, TokenSet};

/// `authorization_code` grant parameters.
#[derive(Debug, Clone)]
pub struct CodeExchangeRequest {
    /// Caller credentials.
    pub credentials: ClientCredentials,
    /// The authorization code.
    pub code: String,
    /// Must equal the redirect URI the code was issued for.
    pub redirect_uri: String,
    /// PKCE verifier.
    pub code_verifier: Option<String>,
}

/// `refresh_token` grant parameters.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    /// Caller credentials.
    pub credentials: ClientCredentials,
    /// The refresh token being rotated.
    pub refresh_token: String,
    /// Optional down-scoped request.
    pub scope: Option<String>,
}

/// Introspection parameters (RFC 7662).
#[derive(Debug, Clone)]
pub struct IntrospectionRequest {
    /// Caller credentials.
    pub credentials: ClientCredentials,
    /// Token to inspect.
    pub token: String,
    /// `access_token` or `refresh_token`.
    pub token_type_hint: Option<String>,
}

/// Revocation parameters (RFC 7009).
#[derive(Debug, Clone)]
pub struct RevocationRequest {
    /// Caller credentials.
    pub credentials: ClientCredentials,
    /// Token to revoke.
    pub token: String,
    /// `access_token` or `refresh_token`.
    pub token_type_hint: Option<String>,
}

/// Raw token endpoint request, dispatched on `grant_type`.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// `authorization_code` or `refresh_token`.
    pub grant_type: String,
    /// Caller credentials.
    pub credentials: ClientCredentials,
    /// Code, for `authorization_code`.
    pub code: Option<String>,
    /// Redirect URI, for `authorization_code`.
    pub redirect_uri: Option<String>,
    /// PKCE verifier, for `authorization_code`.
    pub code_verifier: Option<String>,
    /// Refresh token, for `refresh_token`.
    pub refresh_token: Option<String>,
    /// Requested scope, for `refresh_token`.
    pub scope: Option<String>,
}

impl TokenRequest {
    /// Creates a request with only the grant type and credentials set.
    #[must_use]
    pub fn new(grant_type: impl Into<String>, credentials: ClientCredentials) -> Self {
        Self {
            grant_type: grant_type.into(),
            credentials,
            code: None,
            redirect_uri: None,
            code_verifier: None,
            refresh_token: None,
            scope: None,
        }
    }
}

/// What a grant resolved to, before anything is signed.
struct Grant<'a> {
    client_id: &'a str,
    subject: &'a str,
    access_scopes: &'a Scopes,
    refresh_scopes: &'a Scopes,
    auth_time: Option<DateTime<Utc>>,
    nonce: Option<&'a str>,
    family_id: &'a str,
}

/// Signed tokens plus the records to commit for them.
struct Minted {
    set: TokenSet,
    records: Vec<TokenRecord>,
}

fn invalid_grant(reason: &str) -> OidcError {
    OidcError::InvalidGrant(reason.to_string())
}

/// Drives the token, introspection and revocation operations.
pub struct TokenEngine<S: Store + ?Sized> {
    store: Arc<S>,
    config: Arc<ProviderConfig>,
    issuer: Arc<TokenIssuer>,
    events: Arc<dyn EventListener>,
}

impl<S: Store + ?Sized> TokenEngine<S> {
    /// Creates an engine over `store`.
    pub fn new(
        store: Arc<S>,
        config: Arc<ProviderConfig>,
        issuer: Arc<TokenIssuer>,
        events: Arc<dyn EventListener>,
    ) -> Self {
        Self {
            store,
            config,
            issuer,
            events,
        }
    }

    /// Returns the token signer.
    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Dispatches a raw token request on its `grant_type`.
    ///
    /// # Errors
    ///
    /// Returns `unsupported_grant_type` for unknown grants and
    /// `invalid_request` when a required parameter is missing; otherwise see
    /// [`Self::exchange_code`] and [`Self::refresh`].
    pub fn token(&self, request: TokenRequest) -> OidcResult<TokenSet> {
        let grant: GrantType = request
            .grant_type
            .parse()
            .map_err(|_| OidcError::UnsupportedGrantType(format!("'{}' is not supported", request.grant_type)))?;

        let missing = |name: &str| OidcError::InvalidRequest(format!("{name} is required"));

        match grant {
            GrantType::AuthorizationCode => self.exchange_code(&CodeExchangeRequest {
                credentials: request.credentials,
                code: request.code.ok_or_else(|| missing("code"))?,
                redirect_uri: request.redirect_uri.ok_or_else(|| missing("redirect_uri"))?,
                code_verifier: request.code_verifier,
            }),
            GrantType::RefreshToken => self.refresh(&RefreshRequest {
                credentials: request.credentials,
                refresh_token: request.refresh_token.ok_or_else(|| missing("refresh_token"))?,
                scope: request.scope,
            }),
        }
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// - `invalid_client` if client authentication fails
    /// - `unauthorized_client` if the client may not use this grant
    /// - `invalid_grant` if the code is unknown, expired, consumed, bound to
    ///   another client or redirect URI, or the PKCE verifier does not match
    /// - a storage or signing error, never disguised as `invalid_grant`
    pub fn exchange_code(&self, request: &CodeExchangeRequest) -> OidcResult<TokenSet> {
        let result = self.exchange_code_inner(request);
        match &result {
            Ok(set) => self.events.on_event(
                &EventBuilder::new(EventType::CodeToToken)
                    .client(&request.credentials.client_id)
                    .detail("scope", set.scope.clone().unwrap_or_default())
                    .detail("refresh_token", set.refresh_token.is_some().to_string())
                    .build(),
            ),
            Err(err) => self.events.on_event(
                &EventBuilder::new(EventType::CodeToTokenError)
                    .failure(err.error_code())
                    .client(&request.credentials.client_id)
                    .build(),
            ),
        }
        result
    }

    fn exchange_code_inner(&self, request: &CodeExchangeRequest) -> OidcResult<TokenSet> {
        let client = authenticate_client(self.store.as_ref(), &request.credentials)?;
        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(OidcError::UnauthorizedClient(
                "client may not use the authorization_code grant".to_string(),
            ));
        }

        let code_hash = digest_b64url(&request.code);
        let Some(code) = self.store.get_code(&code_hash)? else {
            tracing::debug!(client_id = %client.client_id, "unknown authorization code");
            return Err(invalid_grant("invalid authorization code"));
        };

        if code.consumed {
            self.contain_code_replay(&client.client_id, &code_hash, code.family_id.as_deref())?;
            return Err(invalid_grant("invalid authorization code"));
        }

        let now = Utc::now();
        if code.is_expired_at(now) {
            tracing::debug!(client_id = %client.client_id, "authorization code expired");
            return Err(invalid_grant("invalid authorization code"));
        }
        if code.client_id != client.client_id {
            tracing::debug!(client_id = %client.client_id, "authorization code issued to another client");
            return Err(invalid_grant("invalid authorization code"));
        }
        if code.redirect_uri != request.redirect_uri {
            tracing::debug!(client_id = %client.client_id, "redirect_uri mismatch");
            return Err(invalid_grant("redirect_uri mismatch"));
        }

        match (&code.code_challenge, request.code_verifier.as_deref()) {
            (Some(challenge), Some(verifier)) => {
                let method = code.code_challenge_method.unwrap_or_default();
                if !PkceVerifier::matches(challenge, method, verifier) {
                    tracing::debug!(client_id = %client.client_id, "PKCE verification failed");
                    return Err(invalid_grant("PKCE verification failed"));
                }
            }
            (Some(_), None) => return Err(invalid_grant("code_verifier is required")),
            (None, Some(_)) => return Err(invalid_grant("code_verifier was not expected")),
            (None, None) => {}
        }

        let family_id = Uuid::new_v4().to_string();
        let with_refresh = code.scopes.contains(scopes::OFFLINE_ACCESS) && client.allows_grant(GrantType::RefreshToken);
        let chain_expires_at = with_refresh.then(|| now + self.config.refresh_chain_duration());

        let minted = self.mint(
            &Grant {
                client_id: &client.client_id,
                subject: &code.subject,
                access_scopes: &code.scopes,
                refresh_scopes: &code.scopes,
                auth_time: code.auth_time,
                nonce: code.nonce.as_deref(),
                family_id: &family_id,
            },
            chain_expires_at,
            true,
            now,
        )?;

        match self.store.mark_consumed(&code_hash, &family_id, &minted.records)? {
            ConsumeOutcome::Consumed => {
                tracing::info!(
                    client_id = %client.client_id,
                    family_id = %family_id,
                    refresh = with_refresh,
                    "authorization code exchanged"
                );
                Ok(minted.set)
            }
            ConsumeOutcome::AlreadyConsumed { family_id: winner } => {
                self.contain_code_replay(&client.client_id, &code_hash, winner.as_deref())?;
                Err(invalid_grant("invalid authorization code"))
            }
            ConsumeOutcome::NotFound => Err(invalid_grant("invalid authorization code")),
        }
    }

    /// Rotates a refresh token.
    ///
    /// # Errors
    ///
    /// - `invalid_client` if client authentication fails
    /// - `unauthorized_client` if the client may not use this grant
    /// - `invalid_grant` if the token is unknown, expired, revoked, already
    ///   used, or the requested scope exceeds the original grant
    /// - a storage or signing error
    pub fn refresh(&self, request: &RefreshRequest) -> OidcResult<TokenSet> {
        let result = self.refresh_inner(request);
        match &result {
            Ok(set) => self.events.on_event(
                &EventBuilder::new(EventType::RefreshToken)
                    .client(&request.credentials.client_id)
                    .detail("scope", set.scope.clone().unwrap_or_default())
                    .build(),
            ),
            Err(err) => self.events.on_event(
                &EventBuilder::new(EventType::RefreshTokenError)
                    .failure(err.error_code())
                    .client(&request.credentials.client_id)
                    .build(),
            ),
        }
        result
    }

    fn refresh_inner(&self, request: &RefreshRequest) -> OidcResult<TokenSet> {
        let client = authenticate_client(self.store.as_ref(), &request.credentials)?;
        if !client.allows_grant(GrantType::RefreshToken) {
            return Err(OidcError::UnauthorizedClient(
                "client may not use the refresh_token grant".to_string(),
            ));
        }

        let token_hash = digest_b64url(&request.refresh_token);
        let Some(record) = self.store.get_token(&token_hash)? else {
            return Err(invalid_grant("invalid refresh token"));
        };
        if !record.is_refresh() || record.client_id != client.client_id {
            tracing::debug!(client_id = %client.client_id, "refresh token not usable by client");
            return Err(invalid_grant("invalid refresh token"));
        }
        if record.revoked {
            return Err(invalid_grant("invalid refresh token"));
        }
        if record.used {
            self.contain_refresh_reuse(&client.client_id, &record.family_id)?;
            return Err(invalid_grant("invalid refresh token"));
        }

        let now = Utc::now();
        if record.is_expired_at(now) {
            return Err(invalid_grant("refresh token expired"));
        }

        let requested = Scopes::parse(request.scope.as_deref().unwrap_or_default());
        let access_scopes = if requested.is_empty() {
            record.scopes.clone()
        } else if requested.is_subset(&record.scopes) {
            requested
        } else {
            tracing::debug!(client_id = %client.client_id, "refresh requested scope beyond original grant");
            return Err(invalid_grant("requested scope exceeds the original grant"));
        };

        let chain_expires_at = record.chain_expires_at.unwrap_or(record.expires_at);
        let minted = self.mint(
            &Grant {
                client_id: &client.client_id,
                subject: &record.subject,
                access_scopes: &access_scopes,
                refresh_scopes: &record.scopes,
                auth_time: record.auth_time,
                nonce: None,
                family_id: &record.family_id,
            },
            Some(chain_expires_at),
            access_scopes.contains(scopes::OPENID),
            now,
        )?;

        match self.store.mark_used(&token_hash, &minted.records)? {
            UseOutcome::Used => {
                tracing::info!(
                    client_id = %client.client_id,
                    family_id = %record.family_id,
                    "refresh token rotated"
                );
                Ok(minted.set)
            }
            UseOutcome::AlreadyUsed => {
                self.contain_refresh_reuse(&client.client_id, &record.family_id)?;
                Err(invalid_grant("invalid refresh token"))
            }
            UseOutcome::Revoked | UseOutcome::NotFound => Err(invalid_grant("invalid refresh token")),
        }
    }

    /// Reports whether a token is active.
    ///
    /// Unknown, expired and revoked tokens, and tokens the caller is not
    /// entitled to see, all yield `{"active": false}`.
    ///
    /// # Errors
    ///
    /// Returns `invalid_client` if the caller fails authentication, or a
    /// storage error.
    pub fn introspect(&self, request: &IntrospectionRequest) -> OidcResult<IntrospectionResponse> {
        let caller = authenticate_client(self.store.as_ref(), &request.credentials)?;
        let response = self.introspect_for(&caller, request)?;

        self.events.on_event(
            &EventBuilder::new(EventType::IntrospectToken)
                .client(&caller.client_id)
                .detail("active", response.active.to_string())
                .build(),
        );
        Ok(response)
    }

    fn introspect_for(&self, caller: &Client, request: &IntrospectionRequest) -> OidcResult<IntrospectionResponse> {
        let Some(record) = self.lookup(&request.token, request.token_type_hint.as_deref())? else {
            return Ok(IntrospectionResponse::inactive());
        };

        if record.client_id != caller.client_id && !caller.introspection_allowed {
            tracing::debug!(caller = %caller.client_id, "introspection of a foreign token");
            return Ok(IntrospectionResponse::inactive());
        }
        if !record.is_active_at(Utc::now()) {
            return Ok(IntrospectionResponse::inactive());
        }

        Ok(match record.kind {
            TokenKind::Refresh => IntrospectionResponse::from_refresh_record(&record, self.issuer.issuer()),
            TokenKind::Access => match self.issuer.verify_access_token(&request.token) {
                Ok(claims) => IntrospectionResponse::from_access_token(&claims),
                Err(err) => {
                    tracing::debug!(error = %err, "stored access token failed verification");
                    IntrospectionResponse::inactive()
                }
            },
        })
    }

    /// Revokes a token.
    ///
    /// Succeeds for unknown, already invalid and foreign tokens. Revoking an
    /// access token affects only that token; revoking a refresh token
    /// cascades according to the configured [`RevocationCascade`].
    ///
    /// # Errors
    ///
    /// Returns `invalid_client` if the caller fails authentication, or a
    /// storage error.
    pub fn revoke(&self, request: &RevocationRequest) -> OidcResult<()> {
        let caller = authenticate_client(self.store.as_ref(), &request.credentials)?;

        let Some(record) = self.lookup(&request.token, request.token_type_hint.as_deref())? else {
            tracing::debug!(caller = %caller.client_id, "revocation of unknown token");
            return Ok(());
        };
        if record.client_id != caller.client_id {
            tracing::debug!(caller = %caller.client_id, "revocation of a foreign token ignored");
            return Ok(());
        }

        let revoked = match record.kind {
            TokenKind::Access => u64::from(self.store.revoke(&record.token_hash)?),
            TokenKind::Refresh => match self.config.revocation_cascade {
                RevocationCascade::Family => self.store.revoke_family(&record.family_id, FamilyRevocation::All)?,
                RevocationCascade::RefreshChain => {
                    self.store.revoke_family(&record.family_id, FamilyRevocation::RefreshOnly)?
                }
                RevocationCascade::TokenOnly => u64::from(self.store.revoke(&record.token_hash)?),
            },
        };

        tracing::info!(
            client_id = %caller.client_id,
            family_id = %record.family_id,
            kind = %record.kind,
            cascade = self.config.revocation_cascade.as_str(),
            revoked,
            "token revoked"
        );
        self.events.on_event(
            &EventBuilder::new(EventType::RevokeGrant)
                .client(&caller.client_id)
                .subject(&record.subject)
                .detail("token_type", record.kind.hint())
                .detail("revoked", revoked.to_string())
                .build(),
        );
        Ok(())
    }

    /// Finds the record for a presented token. The hint only narrows the
    /// answer; a record of the other kind is still returned.
    fn lookup(&self, token: &str, hint: Option<&str>) -> OidcResult<Option<TokenRecord>> {
        let record = self.store.get_token(&digest_b64url(token))?;
        if let (Some(record), Some(kind)) = (&record, hint.and_then(TokenKind::from_hint)) {
            if record.kind != kind {
                tracing::debug!(hint = kind.hint(), actual = record.kind.hint(), "token_type_hint mismatch");
            }
        }
        Ok(record)
    }

    fn mint(
        &self,
        grant: &Grant<'_>,
        chain_expires_at: Option<DateTime<Utc>>,
        with_id_token: bool,
        now: DateTime<Utc>,
    ) -> OidcResult<Minted> {
        // One snapshot so every token in the set carries the same kid.
        let signer: Arc<SigningKeyEntry> = self.issuer.signer();

        let access = self.issuer.issue_access_token(
            &signer,
            grant.subject,
            grant.client_id,
            grant.access_scopes,
            grant.auth_time,
            now,
        )?;

        let mut records = vec![TokenRecord {
            token_hash: digest_b64url(&access.token),
            kind: TokenKind::Access,
            client_id: grant.client_id.to_string(),
            subject: grant.subject.to_string(),
            scopes: grant.access_scopes.clone(),
            family_id: grant.family_id.to_string(),
            jti: Some(access.claims.jti.clone()),
            auth_time: grant.auth_time,
            issued_at: now,
            expires_at: access.expires_at,
            chain_expires_at: None,
            used: false,
            revoked: false,
        }];

        let refresh_token = chain_expires_at.map(|chain_expires_at| {
            let token = generate_refresh_token();
            let expires_at = (now + self.config.refresh_token_duration()).min(chain_expires_at);
            records.push(TokenRecord {
                token_hash: digest_b64url(&token),
                kind: TokenKind::Refresh,
                client_id: grant.client_id.to_string(),
                subject: grant.subject.to_string(),
                scopes: grant.refresh_scopes.clone(),
                family_id: grant.family_id.to_string(),
                jti: None,
                auth_time: grant.auth_time,
                issued_at: now,
                expires_at,
                chain_expires_at: Some(chain_expires_at),
                used: false,
                revoked: false,
            });
            token
        });

        let id_token = if with_id_token {
            Some(self.issuer.issue_id_token(
                &signer,
                grant.subject,
                grant.client_id,
                grant.nonce,
                grant.auth_time,
                &access.token,
                now,
            )?)
        } else {
            None
        };

        Ok(Minted {
            set: TokenSet {
                access_token: access.token,
                token_type: "Bearer".to_string(),
                expires_in: self.issuer.access_lifespan().num_seconds(),
                refresh_token,
                id_token,
                scope: Some(grant.access_scopes.to_string()),
            },
            records,
        })
    }

    fn contain_code_replay(&self, client_id: &str, code_hash: &str, family_id: Option<&str>) -> OidcResult<()> {
        let mut revoked = 0;
        if self.config.revoke_on_replay {
            if let Some(family_id) = family_id {
                revoked = self.revoke_family_for_containment(family_id)?;
            }
        }

        tracing::warn!(
            client_id,
            code = &code_hash[..8.min(code_hash.len())],
            family_id = family_id.unwrap_or("-"),
            revoked,
            "authorization code replay detected"
        );
        self.events.on_event(
            &EventBuilder::new(EventType::CodeReplayDetected)
                .failure("invalid_grant")
                .client(client_id)
                .detail("family_id", family_id.unwrap_or_default())
                .detail("revoked", revoked.to_string())
                .build(),
        );
        Ok(())
    }

    fn contain_refresh_reuse(&self, client_id: &str, family_id: &str) -> OidcResult<()> {
        let revoked = self.revoke_family_for_containment(family_id)?;

        tracing::warn!(client_id, family_id, revoked, "refresh token reuse detected");
        self.events.on_event(
            &EventBuilder::new(EventType::RefreshTokenReuseDetected)
                .failure("invalid_grant")
                .client(client_id)
                .detail("family_id", family_id)
                .detail("revoked", revoked.to_string())
                .build(),
        );
        Ok(())
    }

    fn revoke_family_for_containment(&self, family_id: &str) -> OidcResult<u64> {
        self.store
            .revoke_family(family_id, FamilyRevocation::All)
            .map_err(|err| {
                tracing::error!(family_id, error = %err, "failed to revoke token family after replay");
                OidcError::from(err)
            })
    }
}
