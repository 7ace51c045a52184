//! Provider configuration.
//!
//! Configuration is loaded from `IDP_*` environment variables with defaults,
//! or deserialized from any serde format, and must pass [`ProviderConfig::validate`]
//! before it is handed to the engines.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::Duration;
use idp_crypto::SignatureAlgorithm;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::ConfigError;

/// Longest authorization code lifetime accepted, in seconds.
pub const MAX_AUTH_CODE_LIFESPAN: i64 = 600;

/// Scope that every client and every configuration must support.
pub const OPENID_SCOPE: &str = "openid";

/// Provider-wide policy and token lifetimes.
///
/// All lifespans are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Issuer identifier (`iss` claim and discovery base).
    pub issuer: String,

    /// Authorization code lifespan (1..=600).
    pub auth_code_lifespan: i64,

    /// Access token lifespan.
    pub access_token_lifespan: i64,

    /// ID token lifespan.
    pub id_token_lifespan: i64,

    /// Lifespan of a single refresh token.
    pub refresh_token_lifespan: i64,

    /// Absolute lifespan of a refresh rotation chain, fixed at code exchange.
    pub refresh_chain_max_lifespan: i64,

    /// How long a rotated-out signing key stays published.
    pub key_rotation_grace: i64,

    /// Token signature algorithm.
    pub signature_algorithm: SignatureAlgorithm,

    /// PKCE policy.
    pub pkce: PkcePolicy,

    /// What revoking a refresh token takes down with it.
    pub revocation_cascade: RevocationCascade,

    /// Revoke the token family when a consumed code is presented again.
    pub revoke_on_replay: bool,

    /// Scopes clients may register and request.
    pub supported_scopes: Vec<String>,

    /// Redirect URI allow policy applied at registration.
    pub redirect_policy: RedirectPolicy,
}

/// PKCE requirements for authorization requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkcePolicy {
    /// Require a code challenge from every client. Public clients always need one.
    pub required: bool,

    /// Accept the `plain` challenge method.
    pub allow_plain: bool,
}

impl Default for PkcePolicy {
    fn default() -> Self {
        Self {
            required: true,
            allow_plain: false,
        }
    }
}

/// Which redirect URIs a client may register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectPolicy {
    /// Allowed URI schemes.
    pub allowed_schemes: Vec<String>,

    /// Permit `http` for loopback hosts (native apps, RFC 8252).
    pub allow_loopback_http: bool,

    /// When set, only these hosts are accepted (loopback excepted).
    pub allowed_hosts: Option<Vec<String>>,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["https".to_string()],
            allow_loopback_http: true,
            allowed_hosts: None,
        }
    }
}

impl RedirectPolicy {
    /// Returns whether `uri` is acceptable as a registered redirect URI.
    ///
    /// Absoluteness and fragment checks belong to the caller; this only looks
    /// at the scheme and host.
    #[must_use]
    pub fn permits(&self, uri: &Url) -> bool {
        let scheme = uri.scheme();

        if scheme == "http" && self.allow_loopback_http && is_loopback(uri) {
            return true;
        }

        if !self
            .allowed_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
        {
            return false;
        }

        match (&self.allowed_hosts, uri.host_str()) {
            (None, _) => true,
            (Some(hosts), Some(host)) => hosts.iter().any(|h| h.eq_ignore_ascii_case(host)),
            (Some(_), None) => false,
        }
    }
}

fn is_loopback(uri: &Url) -> bool {
    match uri.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(addr)) => IpAddr::V4(addr).is_loopback(),
        Some(Host::Ipv6(addr)) => IpAddr::V6(addr).is_loopback(),
        None => false,
    }
}

/// What revoking a refresh token cascades to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationCascade {
    /// Every access and refresh token of the rotation family.
    #[default]
    Family,
    /// Every refresh token of the family; issued access tokens run to expiry.
    RefreshChain,
    /// Only the presented token.
    TokenOnly,
}

impl RevocationCascade {
    /// Returns the configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Family => "family",
            Self::RefreshChain => "refresh_chain",
            Self::TokenOnly => "token_only",
        }
    }
}

impl fmt::Display for RevocationCascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationCascade {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "family" => Ok(Self::Family),
            "refresh_chain" => Ok(Self::RefreshChain),
            "token_only" => Ok(Self::TokenOnly),
            other => Err(ConfigError::invalid(
                "revocation_cascade",
                format!("unknown policy '{other}'"),
            )),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            auth_code_lifespan: 60,      // 1 minute
            access_token_lifespan: 300,  // 5 minutes
            id_token_lifespan: 300,      // 5 minutes
            refresh_token_lifespan: 1800, // 30 minutes
            refresh_chain_max_lifespan: 36000, // 10 hours
            key_rotation_grace: 600,
            signature_algorithm: SignatureAlgorithm::Es384,
            pkce: PkcePolicy::default(),
            revocation_cascade: RevocationCascade::Family,
            revoke_on_replay: true,
            supported_scopes: ["openid", "profile", "email", "offline_access"]
                .into_iter()
                .map(String::from)
                .collect(),
            redirect_policy: RedirectPolicy::default(),
        }
    }
}

impl ProviderConfig {
    /// Loads configuration from `IDP_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result fails
    /// [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unset or unparsable numeric values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown algorithm or cascade policy, or if the
    /// result fails [`validate`](Self::validate).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str, default: i64| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default)
        };
        let list = |key: &str, separator: char| {
            lookup(key).map(|v| {
                v.split(separator)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
        };

        let signature_algorithm = match lookup("IDP_SIGNATURE_ALGORITHM") {
            Some(name) => SignatureAlgorithm::from_jwa(&name)
                .map_err(|e| ConfigError::UnsupportedAlgorithm(e.to_string()))?,
            None => defaults.signature_algorithm,
        };

        let revocation_cascade = match lookup("IDP_REVOCATION_CASCADE") {
            Some(policy) => policy.parse()?,
            None => defaults.revocation_cascade,
        };

        let config = Self {
            issuer: lookup("IDP_ISSUER").unwrap_or(defaults.issuer),
            auth_code_lifespan: number("IDP_AUTH_CODE_LIFESPAN", defaults.auth_code_lifespan),
            access_token_lifespan: number(
                "IDP_ACCESS_TOKEN_LIFESPAN",
                defaults.access_token_lifespan,
            ),
            id_token_lifespan: number("IDP_ID_TOKEN_LIFESPAN", defaults.id_token_lifespan),
            refresh_token_lifespan: number(
                "IDP_REFRESH_TOKEN_LIFESPAN",
                defaults.refresh_token_lifespan,
            ),
            refresh_chain_max_lifespan: number(
                "IDP_REFRESH_CHAIN_MAX_LIFESPAN",
                defaults.refresh_chain_max_lifespan,
            ),
            key_rotation_grace: number("IDP_KEY_ROTATION_GRACE", defaults.key_rotation_grace),
            signature_algorithm,
            pkce: PkcePolicy {
                required: flag("IDP_PKCE_REQUIRED", defaults.pkce.required),
                allow_plain: flag("IDP_PKCE_ALLOW_PLAIN", defaults.pkce.allow_plain),
            },
            revocation_cascade,
            revoke_on_replay: flag("IDP_REVOKE_ON_REPLAY", defaults.revoke_on_replay),
            supported_scopes: list("IDP_SUPPORTED_SCOPES", ' ')
                .unwrap_or(defaults.supported_scopes),
            redirect_policy: RedirectPolicy {
                allowed_schemes: list("IDP_REDIRECT_ALLOWED_SCHEMES", ',')
                    .unwrap_or(defaults.redirect_policy.allowed_schemes),
                allow_loopback_http: flag(
                    "IDP_REDIRECT_ALLOW_LOOPBACK_HTTP",
                    defaults.redirect_policy.allow_loopback_http,
                ),
                allowed_hosts: list("IDP_REDIRECT_ALLOWED_HOSTS", ','),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency of the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let issuer = Url::parse(&self.issuer).map_err(|e| ConfigError::InvalidIssuer(e.to_string()))?;
        if issuer.fragment().is_some() || issuer.query().is_some() {
            return Err(ConfigError::InvalidIssuer(
                "issuer must not carry a query or fragment".to_string(),
            ));
        }

        if !(1..=MAX_AUTH_CODE_LIFESPAN).contains(&self.auth_code_lifespan) {
            return Err(ConfigError::invalid(
                "auth_code_lifespan",
                format!("must be between 1 and {MAX_AUTH_CODE_LIFESPAN} seconds"),
            ));
        }

        for (field, value) in [
            ("access_token_lifespan", self.access_token_lifespan),
            ("id_token_lifespan", self.id_token_lifespan),
            ("refresh_token_lifespan", self.refresh_token_lifespan),
        ] {
            if value <= 0 {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
        }

        if self.refresh_chain_max_lifespan < self.refresh_token_lifespan {
            return Err(ConfigError::invalid(
                "refresh_chain_max_lifespan",
                "must be at least refresh_token_lifespan",
            ));
        }

        // A retired key must outlive every token it signed.
        let longest_signed = self.access_token_lifespan.max(self.id_token_lifespan);
        if self.key_rotation_grace < longest_signed {
            return Err(ConfigError::invalid(
                "key_rotation_grace",
                format!("must be at least {longest_signed} seconds"),
            ));
        }

        if !self.supported_scopes.iter().any(|s| s == OPENID_SCOPE) {
            return Err(ConfigError::invalid(
                "supported_scopes",
                "must include 'openid'",
            ));
        }

        if self.redirect_policy.allowed_schemes.is_empty() && !self.redirect_policy.allow_loopback_http {
            return Err(ConfigError::invalid(
                "redirect_policy",
                "no redirect URI could ever be registered",
            ));
        }

        Ok(())
    }

    /// Returns the authorization code lifetime.
    #[must_use]
    pub fn auth_code_duration(&self) -> Duration {
        Duration::seconds(self.auth_code_lifespan)
    }

    /// Returns the access token lifetime.
    #[must_use]
    pub fn access_token_duration(&self) -> Duration {
        Duration::seconds(self.access_token_lifespan)
    }

    /// Returns the ID token lifetime.
    #[must_use]
    pub fn id_token_duration(&self) -> Duration {
        Duration::seconds(self.id_token_lifespan)
    }

    /// Returns the refresh token lifetime.
    #[must_use]
    pub fn refresh_token_duration(&self) -> Duration {
        Duration::seconds(self.refresh_token_lifespan)
    }

    /// Returns the absolute refresh chain lifetime.
    #[must_use]
    pub fn refresh_chain_duration(&self) -> Duration {
        Duration::seconds(self.refresh_chain_max_lifespan)
    }

    /// Returns the signing key grace period.
    #[must_use]
    pub fn key_rotation_grace_duration(&self) -> Duration {
        Duration::seconds(self.key_rotation_grace)
    }

    /// Returns whether `scope` is in the supported list.
    #[must_use]
    pub fn supports_scope(&self, scope: &str) -> bool {
        self.supported_scopes.iter().any(|s| s == scope)
    }
}
