//! # Client Credentials
//!
//! Access tokens for the authority are obtained with the OAuth2
//! client-credentials grant, authenticated by a self-signed RS256 JWT
//! (`private_key_jwt`):
//!
//! ```text
//! POST {realm}/protocol/openid-connect/token
//!   client_id, grant_type=client_credentials,
//!   client_assertion=<RS256 JWT>, client_assertion_type=jwt-bearer
//! ```
//!
//! The token is cached until 30 seconds before its `exp`. The cache sits
//! behind a blocking mutex: the first caller fetches, concurrent callers
//! wait for it and reuse the fresh token.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::PrivateKeySupplier;
use crate::config::{
    ClientCredentialsConfig, ACCESS_TOKEN_RENEWAL_MARGIN, CLIENT_ASSERTION_LIFETIME,
    CLIENT_ASSERTION_TYPE, CLIENT_CREDENTIALS_GRANT,
};
use crate::encoding::{b64url_decode, b64url_encode};
use crate::error::{PseudoError, Result};

const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Status and body of a token endpoint answer.
#[derive(Debug, Clone)]
pub struct TokenHttpResponse {
    pub status: u16,
    pub body: String,
}

/// Sends the form-encoded token request.
pub trait TokenTransport: Send + Sync {
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<TokenHttpResponse>;
}

/// [`TokenTransport`] over a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTokenTransport {
    client: reqwest::blocking::Client,
}

impl HttpTokenTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("pseudo-protocol/", env!("CARGO_PKG_VERSION")))
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PseudoError::Transport(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Reuse an existing client (proxies, custom TLS roots).
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl TokenTransport for HttpTokenTransport {
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<TokenHttpResponse> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .map_err(|e| PseudoError::Transport(format!("POST {url}: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| PseudoError::Transport(format!("POST {url}: cannot read body: {e}")))?;
        Ok(TokenHttpResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// A bearer token and its expiry, read from the unverified `exp` claim.
#[derive(Clone)]
pub struct AccessToken {
    token: String,
    exp: i64,
}

#[derive(Deserialize)]
struct UnverifiedClaims {
    exp: Option<i64>,
}

impl AccessToken {
    /// Read `exp` from a JWT without checking its signature.
    pub fn parse(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let invalid = |reason: &str| PseudoError::Authentication(format!("invalid access token: {reason}"));

        let claims = token.split('.').nth(1).ok_or_else(|| invalid("not a JWT"))?;
        let claims = b64url_decode(claims).map_err(|_| invalid("claims are not Base64url"))?;
        let claims: UnverifiedClaims =
            serde_json::from_slice(&claims).map_err(|_| invalid("claims are not JSON"))?;
        let exp = claims
            .exp
            .ok_or_else(|| invalid("`exp` missing in the access token"))?;
        Ok(Self { token, exp })
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }

    /// Expired, or expiring within [`ACCESS_TOKEN_RENEWAL_MARGIN`].
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.exp < now.timestamp() + ACCESS_TOKEN_RENEWAL_MARGIN.as_secs() as i64
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("exp", &self.exp)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Serialize)]
struct AssertionHeader {
    alg: &'static str,
    typ: &'static str,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    jti: String,
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    grant_type: &'static str,
    exp: i64,
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

/// Fetches and caches access tokens for calls to the authority.
pub struct ClientCredentialsAuthenticator {
    config: ClientCredentialsConfig,
    private_keys: Arc<dyn PrivateKeySupplier>,
    transport: Arc<dyn TokenTransport>,
    token: Mutex<Option<AccessToken>>,
}

impl ClientCredentialsAuthenticator {
    /// Authenticator using [`HttpTokenTransport`].
    pub fn new(config: ClientCredentialsConfig, private_keys: Arc<dyn PrivateKeySupplier>) -> Result<Self> {
        Ok(Self::with_transport(config, private_keys, Arc::new(HttpTokenTransport::new()?)))
    }

    pub fn with_transport(
        config: ClientCredentialsConfig,
        private_keys: Arc<dyn PrivateKeySupplier>,
        transport: Arc<dyn TokenTransport>,
    ) -> Self {
        if config.client_id.trim().is_empty() {
            warn!("`client_id` is blank: no call to the authority is possible");
        }
        if private_keys.get_by_alias(&config.authentication_alias).is_none() {
            warn!(
                alias = %config.authentication_alias,
                "no private key for the authentication alias: no call to the authority is possible"
            );
        }
        Self {
            config,
            private_keys,
            transport,
            token: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientCredentialsConfig {
        &self.config
    }

    /// A valid access token, fetched if the cached one is missing or about
    /// to expire.
    pub fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock();
        if let Some(token) = cached.as_ref().filter(|t| !t.is_expired(Utc::now())) {
            return Ok(token.as_str().to_string());
        }
        let fresh = self.request_token()?;
        debug!(exp = ?fresh.expires_at(), "access token renewed");
        let value = fresh.as_str().to_string();
        *cached = Some(fresh);
        Ok(value)
    }

    /// `Bearer <access token>`.
    pub fn authorization_header(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.access_token()?))
    }

    /// Build and sign a client assertion valid for one minute.
    pub fn client_assertion(&self) -> Result<String> {
        let alias = &self.config.authentication_alias;
        let key = self.private_keys.get_by_alias(alias).ok_or_else(|| {
            PseudoError::Authentication(format!(
                "alias `{alias}` is unknown by the private key supplier"
            ))
        })?;

        let header = AssertionHeader { alg: "RS256", typ: "JWT" };
        let claims = AssertionClaims {
            jti: Uuid::new_v4().to_string(),
            iss: &self.config.client_id,
            sub: &self.config.client_id,
            aud: &self.config.realm_url,
            grant_type: CLIENT_CREDENTIALS_GRANT,
            exp: Utc::now().timestamp() + CLIENT_ASSERTION_LIFETIME.as_secs() as i64,
        };
        let signing_input = format!("{}.{}", encode_part(&header)?, encode_part(&claims)?);

        let signature = SigningKey::<Sha256>::new(key)
            .try_sign(signing_input.as_bytes())
            .map_err(|e| PseudoError::Crypto(format!("cannot sign client assertion: {e}")))?;
        Ok(format!("{signing_input}.{}", b64url_encode(signature.to_bytes())))
    }

    fn request_token(&self) -> Result<AccessToken> {
        let assertion = self.client_assertion()?;
        let url = self.config.token_url();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", CLIENT_CREDENTIALS_GRANT),
            ("client_assertion", assertion.as_str()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
        ];
        let response = self.transport.post_form(&url, &form)?;
        if !(200..300).contains(&response.status) {
            return Err(PseudoError::Authentication(format!(
                "token endpoint returned code {}: {}",
                response.status, response.body
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&response.body).map_err(|e| {
            PseudoError::Authentication(format!("cannot parse the token response: {e}"))
        })?;
        let token = parsed.access_token.ok_or_else(|| {
            PseudoError::Authentication(format!(
                "no `access_token` in the token response: {}",
                response.body
            ))
        })?;
        AccessToken::parse(token)
    }
}

impl fmt::Debug for ClientCredentialsAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsAuthenticator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn encode_part<T: Serialize>(part: &T) -> Result<String> {
    serde_json::to_string(part)
        .map(b64url_encode)
        .map_err(|e| PseudoError::Crypto(format!("cannot serialize client assertion: {e}")))
}
