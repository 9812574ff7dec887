//! # Protocol Configuration & Constants
//!
//! Every timing constant and wire-level name used by the pseudonymisation
//! protocol lives here, together with the two tunable configuration structs:
//! [`RegistryConfig`] for the domain registry and [`ClientCredentialsConfig`]
//! for the signed-JWT client-credentials flow.

use std::time::Duration;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Transit Info
// ---------------------------------------------------------------------------

/// Tolerated clock skew when checking the `iat` / `exp` of a transit info.
pub const TRANSIT_INFO_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// The only JWE key management algorithm accepted for transit infos.
pub const TRANSIT_INFO_ALGORITHM: &str = "dir";

/// AES-GCM initialization vector length (96 bits).
pub const AES_GCM_IV_LENGTH: usize = 12;

/// AES-GCM authentication tag length (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// Separator between the point and the transit info in the textual form of a
/// pseudonym in transit.
pub const IN_TRANSIT_SEPARATOR: char = ':';

// ---------------------------------------------------------------------------
// Domain Refresh
// ---------------------------------------------------------------------------

/// Minimum delay between two domain refreshes once the domains are loaded.
/// Keeps a burst of unknown kids from hammering the authority.
pub const DOMAIN_REFRESH_COOLDOWN: Duration = Duration::from_secs(60);

/// Minimum delay between two refresh attempts while the registry has never
/// been initialized.
pub const DOMAIN_INITIAL_RETRY_COOLDOWN: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Client Authentication
// ---------------------------------------------------------------------------

/// An access token is renewed when it expires within this margin.
pub const ACCESS_TOKEN_RENEWAL_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime of the self-signed client assertion.
pub const CLIENT_ASSERTION_LIFETIME: Duration = Duration::from_secs(60);

/// Alias of the authentication key when none is configured.
pub const DEFAULT_AUTHENTICATION_ALIAS: &str = "authentication";

/// `client_assertion_type` sent with the token request (RFC 7523).
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// OAuth2 grant used to obtain access tokens.
pub const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";

/// Path of the OpenID Connect endpoints relative to the realm URL.
pub const OPENID_CONNECT_PATH: &str = "protocol/openid-connect/";

// ---------------------------------------------------------------------------
// Tunables
// ---------------------------------------------------------------------------

/// Tunable parameters for the domain registry.
///
/// Defaults match the behaviour expected from a production deployment. Tests
/// shorten the cooldowns to observe refreshes without waiting a minute.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Cooldown applied after every refresh attempt once the registry has been
    /// initialized (successful or not).
    pub refresh_cooldown: Duration,

    /// Cooldown applied after a failed refresh while the registry has never
    /// been initialized.
    pub initial_retry_cooldown: Duration,

    /// Whether the registry performs a synchronous refresh when it is built.
    pub refresh_on_build: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_cooldown: DOMAIN_REFRESH_COOLDOWN,
            initial_retry_cooldown: DOMAIN_INITIAL_RETRY_COOLDOWN,
            refresh_on_build: true,
        }
    }
}

/// Settings of the client-credentials flow used to call the authority.
///
/// Deserializable so that hosts can embed it in their own configuration files.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCredentialsConfig {
    /// OAuth2 client id, used as `iss` and `sub` of the client assertion.
    pub client_id: String,

    /// URL of the realm issuing the tokens, used as `aud` of the client
    /// assertion and as the base of the token endpoint.
    pub realm_url: String,

    /// Alias of the private key signing the client assertion.
    #[serde(default = "default_authentication_alias")]
    pub authentication_alias: String,
}

fn default_authentication_alias() -> String {
    DEFAULT_AUTHENTICATION_ALIAS.to_string()
}

impl ClientCredentialsConfig {
    /// Create a configuration using the default authentication alias.
    pub fn new(client_id: impl Into<String>, realm_url: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            realm_url: realm_url.into(),
            authentication_alias: default_authentication_alias(),
        }
    }

    /// The token endpoint derived from the realm URL.
    pub fn token_url(&self) -> String {
        format!("{}{}token", append_slash_if_missing(&self.realm_url), OPENID_CONNECT_PATH)
    }
}

/// Append a trailing `/` to a base URL unless it already ends with one.
pub fn append_slash_if_missing(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}
