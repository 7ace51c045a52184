//! Authorization Engine.
//!
//! An authorization attempt moves through
//! `Requested -> ClientValidated -> CodeIssued`, or ends in `Rejected`.
//! The transitions are typed: [`AuthorizationEngine::validate`] turns an
//! [`AuthorizationRequest`] into a [`ValidatedAuthorization`], and only that
//! value can be passed to [`AuthorizationEngine::issue_code`] together with
//! the outcome of the external login and consent step.
//!
//! Errors are redirected back to the client only once the redirect URI is
//! known to be registered for the client. Before that point they surface
//! directly as [`OidcError`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use idp_core::event::EventBuilder;
use idp_core::{EventListener, EventType, ProviderConfig};
use idp_crypto::digest_b64url;
use idp_crypto::random::generate_auth_code;
use idp_model::{AuthorizationCode, Client, CodeChallengeMethod, GrantType, ResponseType, Scopes};
use idp_storage::{StorageError, Store};
use url::Url;

use crate::error::{OidcError, OidcResult};
use crate::pkce::PkceVerifier;

/// States of one authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    /// Parameters received, nothing checked yet.
    Requested,
    /// Client, redirect URI, response type, scope and PKCE accepted.
    ClientValidated,
    /// A code was minted and stored. Terminal.
    CodeIssued,
    /// The attempt failed. Terminal.
    Rejected,
}

impl AuthorizationState {
    /// Returns a stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::ClientValidated => "client_validated",
            Self::CodeIssued => "code_issued",
            Self::Rejected => "rejected",
        }
    }
}

/// Parameters of an authorization request, as parsed by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Client identifier.
    pub client_id: String,
    /// Redirect URI; must exactly match a registered one.
    pub redirect_uri: Option<String>,
    /// Response type; only `code` is supported.
    pub response_type: String,
    /// Space-delimited requested scope.
    pub scope: Option<String>,
    /// Opaque client state, echoed unchanged.
    pub state: Option<String>,
    /// OIDC nonce, copied into the ID token.
    pub nonce: Option<String>,
    /// PKCE code challenge.
    pub code_challenge: Option<String>,
    /// PKCE method; `plain` when absent (RFC 7636 Section 4.3).
    pub code_challenge_method: Option<String>,
}

impl AuthorizationRequest {
    /// Creates a `response_type=code` request.
    #[must_use]
    pub fn code(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: Some(redirect_uri.into()),
            response_type: ResponseType::Code.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the state.
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Sets the nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Sets the PKCE challenge and method.
    #[must_use]
    pub fn with_pkce(mut self, challenge: impl Into<String>, method: CodeChallengeMethod) -> Self {
        self.code_challenge = Some(challenge.into());
        self.code_challenge_method = Some(method.as_str().to_string());
        self
    }
}

/// A request that passed validation. Only the engine constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAuthorization {
    client_id: String,
    redirect_uri: String,
    scopes: Scopes,
    state: Option<String>,
    nonce: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<CodeChallengeMethod>,
}

impl ValidatedAuthorization {
    /// Returns the client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the validated redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the requested scopes, for display on the consent screen.
    #[must_use]
    pub const fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Returns the client state.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    /// Returns the state machine position.
    #[must_use]
    pub const fn position(&self) -> AuthorizationState {
        AuthorizationState::ClientValidated
    }
}

/// Outcome of the external login and consent step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentDecision {
    /// The user authenticated and approved some scopes.
    Approved {
        /// Authenticated subject identifier.
        subject: String,
        /// Scopes the user approved.
        scopes: Scopes,
        /// When the user authenticated.
        auth_time: DateTime<Utc>,
    },
    /// The user declined.
    Denied,
}

/// Redirect back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResponse {
    /// Success: carries the code.
    Code {
        /// Registered redirect URI.
        redirect_uri: String,
        /// Authorization code (plaintext, never stored).
        code: String,
        /// Echoed client state.
        state: Option<String>,
    },
    /// Failure that is safe to report to the client.
    Error {
        /// Registered redirect URI.
        redirect_uri: String,
        /// OAuth error code.
        error: &'static str,
        /// Human-readable description.
        description: String,
        /// Echoed client state.
        state: Option<String>,
    },
}

impl AuthorizationResponse {
    /// Returns the terminal state this response represents.
    #[must_use]
    pub const fn outcome(&self) -> AuthorizationState {
        match self {
            Self::Code { .. } => AuthorizationState::CodeIssued,
            Self::Error { .. } => AuthorizationState::Rejected,
        }
    }

    /// Builds the redirect URL with the response in its query.
    ///
    /// # Errors
    ///
    /// Returns `server_error` if the stored redirect URI no longer parses.
    pub fn to_redirect_url(&self) -> OidcResult<Url> {
        let (redirect_uri, state) = match self {
            Self::Code {
                redirect_uri, state, ..
            }
            | Self::Error {
                redirect_uri, state, ..
            } => (redirect_uri, state),
        };

        let mut url = Url::parse(redirect_uri)
            .map_err(|e| OidcError::ServerError(format!("stored redirect_uri is invalid: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            match self {
                Self::Code { code, .. } => {
                    query.append_pair("code", code);
                }
                Self::Error {
                    error, description, ..
                } => {
                    query.append_pair("error", error);
                    query.append_pair("error_description", description);
                }
            }
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        Ok(url)
    }
}

/// Why validation stopped.
#[derive(Debug)]
pub enum AuthorizationRejection {
    /// The redirect URI is trusted; report the error there.
    Redirect(AuthorizationResponse),
    /// The redirect URI is missing or untrusted, or infrastructure failed.
    /// Never redirect.
    Direct(OidcError),
}

impl From<OidcError> for AuthorizationRejection {
    fn from(err: OidcError) -> Self {
        Self::Direct(err)
    }
}

impl From<StorageError> for AuthorizationRejection {
    fn from(err: StorageError) -> Self {
        Self::Direct(OidcError::from(err))
    }
}

/// Drives the `/authorize` step.
pub struct AuthorizationEngine<S: Store + ?Sized> {
    store: Arc<S>,
    config: Arc<ProviderConfig>,
    events: Arc<dyn EventListener>,
}

impl<S: Store + ?Sized> AuthorizationEngine<S> {
    /// Creates an engine over `store`.
    pub fn new(store: Arc<S>, config: Arc<ProviderConfig>, events: Arc<dyn EventListener>) -> Self {
        Self {
            store,
            config,
            events,
        }
    }

    /// Validates a request and then issues a code for `decision`.
    ///
    /// # Errors
    ///
    /// Returns an error, instead of a redirect, when the client is unknown,
    /// the redirect URI is missing or unregistered, or infrastructure fails.
    pub fn authorize(
        &self,
        request: &AuthorizationRequest,
        decision: ConsentDecision,
    ) -> OidcResult<AuthorizationResponse> {
        match self.validate(request) {
            Ok(validated) => self.issue_code(&validated, decision),
            Err(AuthorizationRejection::Redirect(response)) => Ok(response),
            Err(AuthorizationRejection::Direct(err)) => Err(err),
        }
    }

    /// Validates a request against its client and the provider policy.
    ///
    /// # Errors
    ///
    /// See [`AuthorizationRejection`].
    pub fn validate(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<ValidatedAuthorization, AuthorizationRejection> {
        tracing::debug!(
            client_id = %request.client_id,
            state = AuthorizationState::Requested.as_str(),
            "authorization request"
        );

        let Some(client) = self.store.get_client(&request.client_id)? else {
            return Err(self.reject_direct(
                &request.client_id,
                OidcError::InvalidRequest("unknown client_id".to_string()),
            ));
        };

        let redirect_uri = match request.redirect_uri.as_deref() {
            Some(uri) if client.is_valid_redirect_uri(uri) => uri.to_string(),
            Some(_) => {
                return Err(self.reject_direct(
                    &client.client_id,
                    OidcError::InvalidRequest("redirect_uri is not registered for this client".to_string()),
                ));
            }
            None => {
                return Err(self.reject_direct(
                    &client.client_id,
                    OidcError::InvalidRequest("redirect_uri is required".to_string()),
                ));
            }
        };

        // From here on errors go back to the registered redirect URI.
        let redirect = |err: OidcError| {
            AuthorizationRejection::Redirect(self.reject(&client.client_id, &redirect_uri, request.state.clone(), &err))
        };

        self.check_response_type(&client, &request.response_type)
            .map_err(redirect)?;
        let scopes = self.check_scope(&client, request.scope.as_deref()).map_err(redirect)?;
        let (code_challenge, code_challenge_method) = self.check_pkce(&client, request).map_err(redirect)?;

        tracing::debug!(
            client_id = %client.client_id,
            state = AuthorizationState::ClientValidated.as_str(),
            scope = %scopes,
            "authorization request validated"
        );

        Ok(ValidatedAuthorization {
            client_id: client.client_id,
            redirect_uri,
            scopes,
            state: request.state.clone(),
            nonce: request.nonce.clone(),
            code_challenge,
            code_challenge_method,
        })
    }

    /// Mints and stores a code for a validated request.
    ///
    /// The code is bound to the subject, client, redirect URI, the requested
    /// scopes the user approved, and the PKCE challenge.
    ///
    /// # Errors
    ///
    /// Returns an error only if the code cannot be stored.
    pub fn issue_code(
        &self,
        validated: &ValidatedAuthorization,
        decision: ConsentDecision,
    ) -> OidcResult<AuthorizationResponse> {
        let (subject, approved, auth_time) = match decision {
            ConsentDecision::Approved {
                subject,
                scopes,
                auth_time,
            } => (subject, scopes, auth_time),
            ConsentDecision::Denied => {
                return Ok(self.reject(
                    &validated.client_id,
                    &validated.redirect_uri,
                    validated.state.clone(),
                    &OidcError::AccessDenied("the user denied the request".to_string()),
                ));
            }
        };

        let scopes = validated.scopes.intersection(&approved);
        if scopes.is_empty() {
            return Ok(self.reject(
                &validated.client_id,
                &validated.redirect_uri,
                validated.state.clone(),
                &OidcError::AccessDenied("no requested scope was approved".to_string()),
            ));
        }

        let code = generate_auth_code();
        let now = Utc::now();
        let record = AuthorizationCode {
            code_hash: digest_b64url(&code),
            client_id: validated.client_id.clone(),
            redirect_uri: validated.redirect_uri.clone(),
            scopes,
            subject,
            nonce: validated.nonce.clone(),
            code_challenge: validated.code_challenge.clone(),
            code_challenge_method: validated.code_challenge_method,
            auth_time: Some(auth_time),
            issued_at: now,
            expires_at: now + self.config.auth_code_duration(),
            consumed: false,
            family_id: None,
        };

        self.store.put_code(&record)?;

        tracing::info!(
            client_id = %record.client_id,
            subject = %record.subject,
            state = AuthorizationState::CodeIssued.as_str(),
            "authorization code issued"
        );
        self.events.on_event(
            &EventBuilder::new(EventType::CodeIssued)
                .client(&record.client_id)
                .subject(&record.subject)
                .detail("scope", record.scopes.to_string())
                .build(),
        );

        Ok(AuthorizationResponse::Code {
            redirect_uri: validated.redirect_uri.clone(),
            code,
            state: validated.state.clone(),
        })
    }

    fn check_response_type(&self, client: &Client, response_type: &str) -> OidcResult<()> {
        let parsed: ResponseType = response_type
            .parse()
            .map_err(|_| OidcError::UnsupportedResponseType(format!("'{response_type}' is not supported")))?;

        if !client.allows_response_type(parsed) || !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(OidcError::UnauthorizedClient(
                "client may not use the authorization code flow".to_string(),
            ));
        }
        Ok(())
    }

    fn check_scope(&self, client: &Client, scope: Option<&str>) -> OidcResult<Scopes> {
        let scopes = Scopes::parse(scope.unwrap_or_default());
        if scopes.is_empty() {
            return Err(OidcError::InvalidScope("scope is required".to_string()));
        }
        if let Some(unknown) = scopes.iter().find(|s| !self.config.supports_scope(s)) {
            return Err(OidcError::InvalidScope(format!("scope '{unknown}' is not supported")));
        }
        if !client.allows_scopes(&scopes) {
            return Err(OidcError::InvalidScope(
                "requested scope exceeds the client's registration".to_string(),
            ));
        }
        Ok(scopes)
    }

    fn check_pkce(
        &self,
        client: &Client,
        request: &AuthorizationRequest,
    ) -> OidcResult<(Option<String>, Option<CodeChallengeMethod>)> {
        let Some(challenge) = request.code_challenge.as_deref() else {
            if request.code_challenge_method.is_some() {
                return Err(OidcError::InvalidRequest(
                    "code_challenge_method without code_challenge".to_string(),
                ));
            }
            if self.config.pkce.required || client.is_public() {
                return Err(OidcError::InvalidRequest("code_challenge is required".to_string()));
            }
            return Ok((None, None));
        };

        let method = match request.code_challenge_method.as_deref() {
            None => CodeChallengeMethod::Plain,
            Some(m) => m
                .parse()
                .map_err(|_| OidcError::InvalidRequest(format!("unsupported code_challenge_method '{m}'")))?,
        };

        if method == CodeChallengeMethod::Plain && !self.config.pkce.allow_plain {
            return Err(OidcError::InvalidRequest(
                "code_challenge_method 'plain' is not allowed".to_string(),
            ));
        }
        if !PkceVerifier::is_well_formed(challenge) {
            return Err(OidcError::InvalidRequest("code_challenge is malformed".to_string()));
        }

        Ok((Some(challenge.to_string()), Some(method)))
    }

    fn reject(
        &self,
        client_id: &str,
        redirect_uri: &str,
        state: Option<String>,
        err: &OidcError,
    ) -> AuthorizationResponse {
        tracing::debug!(
            client_id,
            error = err.error_code(),
            state = AuthorizationState::Rejected.as_str(),
            "authorization request rejected"
        );
        self.events.on_event(
            &EventBuilder::new(EventType::AuthorizationRejected)
                .failure(err.error_code())
                .client(client_id)
                .detail("redirect", "true")
                .build(),
        );

        AuthorizationResponse::Error {
            redirect_uri: redirect_uri.to_string(),
            error: err.error_code(),
            description: err.description(),
            state,
        }
    }

    fn reject_direct(&self, client_id: &str, err: OidcError) -> AuthorizationRejection {
        tracing::warn!(
            client_id,
            error = err.error_code(),
            state = AuthorizationState::Rejected.as_str(),
            "authorization request rejected without redirect"
        );
        self.events.on_event(
            &EventBuilder::new(EventType::AuthorizationRejected)
                .failure(err.error_code())
                .client(client_id)
                .detail("redirect", "false")
                .build(),
        );
        AuthorizationRejection::Direct(err)
    }
}
