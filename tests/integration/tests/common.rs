//! Common test utilities and fixtures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use idp_core::ProviderConfig;
use idp_core::event::InMemoryEventListener;
use idp_model::{AuthorizationCode, Client, ClientMetadata, CodeChallengeMethod, GrantType, TokenRecord};
use idp_protocol_oidc::{
    AuthorizationRequest, AuthorizationResponse, ClientCredentials, CodeExchangeRequest, ConsentDecision,
    KeyManager, OidcResult, Provider, RefreshRequest, RegisteredClient, TokenSet,
};
use idp_storage::{
    ClientStore, CodeStore, ConsumeOutcome, FamilyRevocation, MemoryStore, StorageError, StorageResult, Store,
    TokenStore, UseOutcome,
};
use idp_storage_sql::SqliteStore;
use tempfile::TempDir;

/// Registered redirect URI of every test client.
pub const REDIRECT_URI: &str = "https://app.example.com/callback";

/// RFC 7636 Appendix B verifier.
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

/// RFC 7636 Appendix B `S256` challenge for [`VERIFIER`].
pub const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

/// Storage adapter under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process reference adapter.
    Memory,
    /// SQLite database file in a temporary directory.
    Sqlite,
}

/// Every adapter; property tests run once per entry.
pub const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Sqlite];

/// A provider over one backend, with captured security events.
pub struct TestEnv {
    /// Adapter in use.
    pub backend: Backend,
    /// The provider under test.
    pub provider: Provider<dyn Store>,
    /// Direct access to persisted state.
    pub store: Arc<dyn Store>,
    /// Captured security events.
    pub events: Arc<InMemoryEventListener>,
    /// Shared signing keys.
    pub keys: Arc<KeyManager>,
    config: ProviderConfig,
    dir: Option<TempDir>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("idp_protocol_oidc=debug,idp_storage_sql=debug,idp_storage=warn")
        .with_test_writer()
        .try_init();
}

impl TestEnv {
    /// Creates an environment with the default configuration.
    pub fn new(backend: Backend) -> anyhow::Result<Self> {
        Self::with_config(backend, ProviderConfig::default())
    }

    /// Creates an environment with a custom configuration.
    pub fn with_config(backend: Backend, config: ProviderConfig) -> anyhow::Result<Self> {
        let (store, dir): (Arc<dyn Store>, Option<TempDir>) = match backend {
            Backend::Memory => (Arc::new(MemoryStore::new()), None),
            Backend::Sqlite => {
                let dir = tempfile::tempdir()?;
                let store = SqliteStore::open_path(dir.path().join("idp.db"))?;
                (Arc::new(store), Some(dir))
            }
        };
        Self::from_store(backend, store, config, dir)
    }

    /// Creates an environment over an arbitrary store.
    pub fn from_store(
        backend: Backend,
        store: Arc<dyn Store>,
        config: ProviderConfig,
        dir: Option<TempDir>,
    ) -> anyhow::Result<Self> {
        init_tracing();

        let keys = Arc::new(KeyManager::generate(
            config.signature_algorithm,
            config.key_rotation_grace_duration(),
        )?);
        let events = Arc::new(InMemoryEventListener::new());
        let provider = Provider::with_parts(config.clone(), store.clone(), keys.clone(), events.clone())?;

        Ok(Self {
            backend,
            provider,
            store,
            events,
            keys,
            config,
            dir,
        })
    }

    /// Builds `count` providers that share this environment's state through
    /// independent store handles. For SQLite every handle is its own
    /// connection to the same database file.
    pub fn handles(&self, count: usize) -> anyhow::Result<Vec<Provider<dyn Store>>> {
        (0..count)
            .map(|_| -> anyhow::Result<Provider<dyn Store>> {
                let store: Arc<dyn Store> = match &self.dir {
                    Some(dir) => Arc::new(SqliteStore::open_path(dir.path().join("idp.db"))?),
                    None => self.store.clone(),
                };
                Ok(Provider::with_parts(
                    self.config.clone(),
                    store,
                    self.keys.clone(),
                    self.events.clone(),
                )?)
            })
            .collect()
    }

    /// Registers a confidential client allowed the refresh grant.
    pub fn register_confidential(&self, scope: &str) -> anyhow::Result<RegisteredClient> {
        let metadata = ClientMetadata::new(REDIRECT_URI)
            .with_grant_types([GrantType::AuthorizationCode, GrantType::RefreshToken])
            .with_scope(scope)
            .with_name("Confidential App");
        Ok(self.provider.registry().register(&metadata)?)
    }

    /// Registers a public client allowed the refresh grant.
    pub fn register_public(&self, scope: &str) -> anyhow::Result<RegisteredClient> {
        let metadata = ClientMetadata::new(REDIRECT_URI)
            .public()
            .with_grant_types([GrantType::AuthorizationCode, GrantType::RefreshToken])
            .with_scope(scope);
        Ok(self.provider.registry().register(&metadata)?)
    }

    /// Runs `/authorize` with an S256 challenge and full consent, and
    /// returns the code.
    pub fn authorize(&self, client_id: &str, scope: &str) -> anyhow::Result<String> {
        let request = AuthorizationRequest::code(client_id, REDIRECT_URI)
            .with_scope(scope)
            .with_state("af0ifjsldkj")
            .with_nonce("n-0S6_WzA2Mj")
            .with_pkce(CHALLENGE, CodeChallengeMethod::S256);
        let response = self.provider.authorization().authorize(&request, approve_all(scope))?;
        code_from(&response)
    }

    /// Exchanges a code with the RFC 7636 verifier.
    pub fn exchange(&self, credentials: &ClientCredentials, code: &str) -> OidcResult<TokenSet> {
        self.provider.tokens().exchange_code(&exchange_request(credentials, code))
    }

    /// Rotates a refresh token.
    pub fn refresh(&self, credentials: &ClientCredentials, refresh_token: &str) -> OidcResult<TokenSet> {
        self.provider.tokens().refresh(&refresh_request(credentials, refresh_token))
    }

    /// Authorizes and exchanges in one step.
    pub fn login(&self, registered: &RegisteredClient, scope: &str) -> anyhow::Result<TokenSet> {
        let code = self.authorize(&registered.client.client_id, scope)?;
        Ok(self.exchange(&credentials(registered), &code)?)
    }

    /// Stores a code for `client` expiring at `expires_at`.
    pub fn seed_code(&self, client: &Client, code: &str, expires_at: DateTime<Utc>) -> anyhow::Result<()> {
        let issued_at = expires_at - chrono::Duration::seconds(60);
        self.store.put_code(&AuthorizationCode {
            code_hash: idp_crypto::digest_b64url(code),
            client_id: client.client_id.clone(),
            redirect_uri: REDIRECT_URI.to_string(),
            scopes: client.scopes.clone(),
            subject: "alice".to_string(),
            nonce: None,
            code_challenge: Some(CHALLENGE.to_string()),
            code_challenge_method: Some(CodeChallengeMethod::S256),
            auth_time: Some(issued_at),
            issued_at,
            expires_at,
            consumed: false,
            family_id: None,
        })?;
        Ok(())
    }

    /// Returns the stored record for a plaintext token.
    pub fn record(&self, token: &str) -> anyhow::Result<TokenRecord> {
        self.store
            .get_token(&idp_crypto::digest_b64url(token))?
            .ok_or_else(|| anyhow::anyhow!("token not stored"))
    }
}

/// Consent approving every scope in `scope` for subject `alice`.
pub fn approve_all(scope: &str) -> ConsentDecision {
    ConsentDecision::Approved {
        subject: "alice".to_string(),
        scopes: idp_model::Scopes::parse(scope),
        auth_time: Utc::now(),
    }
}

/// Extracts the code from a successful authorization response.
pub fn code_from(response: &AuthorizationResponse) -> anyhow::Result<String> {
    match response {
        AuthorizationResponse::Code { code, .. } => Ok(code.clone()),
        AuthorizationResponse::Error { error, description, .. } => {
            anyhow::bail!("authorization failed: {error}: {description}")
        }
    }
}

/// Credentials a registered client presents at the token endpoint.
pub fn credentials(registered: &RegisteredClient) -> ClientCredentials {
    match &registered.client_secret {
        Some(secret) => ClientCredentials::post(&registered.client.client_id, secret),
        None => ClientCredentials::public(&registered.client.client_id),
    }
}

/// A code exchange request using [`VERIFIER`].
pub fn exchange_request(credentials: &ClientCredentials, code: &str) -> CodeExchangeRequest {
    CodeExchangeRequest {
        credentials: credentials.clone(),
        code: code.to_string(),
        redirect_uri: REDIRECT_URI.to_string(),
        code_verifier: Some(VERIFIER.to_string()),
    }
}

/// A refresh request keeping the original scope.
pub fn refresh_request(credentials: &ClientCredentials, refresh_token: &str) -> RefreshRequest {
    RefreshRequest {
        credentials: credentials.clone(),
        refresh_token: refresh_token.to_string(),
        scope: None,
    }
}

/// A store that injects infrastructure failures into a [`MemoryStore`].
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_family_revocation: AtomicBool,
    fail_code_reads: AtomicBool,
    fail_client_reads: AtomicBool,
}

impl FailingStore {
    /// Makes every `revoke_family` call time out.
    pub fn fail_family_revocation(&self, fail: bool) {
        self.fail_family_revocation.store(fail, Ordering::SeqCst);
    }

    /// Makes every `get_code` call lose its connection.
    pub fn fail_code_reads(&self, fail: bool) {
        self.fail_code_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every `get_client` call time out.
    pub fn fail_client_reads(&self, fail: bool) {
        self.fail_client_reads.store(fail, Ordering::SeqCst);
    }
}

impl ClientStore for FailingStore {
    fn put_client(&self, client: &Client) -> StorageResult<()> {
        self.inner.put_client(client)
    }

    fn get_client(&self, client_id: &str) -> StorageResult<Option<Client>> {
        if self.fail_client_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Timeout("injected client lookup timeout".to_string()));
        }
        self.inner.get_client(client_id)
    }

    fn update_client(&self, client: &Client) -> StorageResult<()> {
        self.inner.update_client(client)
    }
}

impl CodeStore for FailingStore {
    fn put_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        self.inner.put_code(code)
    }

    fn get_code(&self, code_hash: &str) -> StorageResult<Option<AuthorizationCode>> {
        if self.fail_code_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("injected connection loss".to_string()));
        }
        self.inner.get_code(code_hash)
    }

    fn mark_consumed(
        &self,
        code_hash: &str,
        family_id: &str,
        issued: &[TokenRecord],
    ) -> StorageResult<ConsumeOutcome> {
        self.inner.mark_consumed(code_hash, family_id, issued)
    }

    fn purge_expired_codes(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        self.inner.purge_expired_codes(now)
    }
}

impl TokenStore for FailingStore {
    fn put_token(&self, token: &TokenRecord) -> StorageResult<()> {
        self.inner.put_token(token)
    }

    fn get_token(&self, token_hash: &str) -> StorageResult<Option<TokenRecord>> {
        self.inner.get_token(token_hash)
    }

    fn mark_used(&self, token_hash: &str, replacements: &[TokenRecord]) -> StorageResult<UseOutcome> {
        self.inner.mark_used(token_hash, replacements)
    }

    fn revoke(&self, token_hash: &str) -> StorageResult<bool> {
        self.inner.revoke(token_hash)
    }

    fn revoke_family(&self, family_id: &str, scope: FamilyRevocation) -> StorageResult<u64> {
        if self.fail_family_revocation.load(Ordering::SeqCst) {
            return Err(StorageError::Timeout("injected revocation timeout".to_string()));
        }
        self.inner.revoke_family(family_id, scope)
    }

    fn purge_expired_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        self.inner.purge_expired_tokens(now)
    }
}
