//! # Domain Key Unwrapping
//!
//! The authority distributes each domain secret key as a JWE in general JSON
//! serialization, with one recipient per client public key:
//!
//! ```text
//! { "protected": "...", "iv": "...", "ciphertext": "...", "tag": "...",
//!   "recipients": [ { "header": { "kid": "...", "jku": "<jwks url>" },
//!                     "encrypted_key": "..." } ] }
//! ```
//!
//! Unwrapping a key:
//!
//! 1. keep the recipients whose `jku` is our JWKS URL (none: skip the key);
//! 2. resolve the first recipient's `kid` in our JWKS and take its
//!    `x5t#S256` certificate thumbprint;
//! 3. ask the [`PrivateKeySupplier`] for the RSA key with that thumbprint;
//! 4. RSA-OAEP decrypt the content encryption key (SHA-256, MGF1-SHA-1);
//! 5. AES-GCM decrypt the content with the protected header as AAD, which
//!    yields an `oct` JWK `{ "kty": "oct", "k": "...", "alg": "A256GCM" }`.

use std::fmt;
use std::sync::Arc;

use rsa::Oaep;
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::client::{JwksClient, PrivateKeySupplier};
use crate::encoding::{b64url_decode, b64url_encode, Base64Flavor};
use crate::error::{PseudoError, Result};
use crate::transit::jwe::{aes_gcm_open, EncryptionMethod, SecretKey};

/// Where the client's key material comes from.
#[derive(Clone)]
pub struct KeySource {
    jwks_url: String,
    jwks_client: Arc<dyn JwksClient>,
    private_keys: Arc<dyn PrivateKeySupplier>,
}

impl KeySource {
    pub fn new(
        jwks_url: impl Into<String>,
        jwks_client: Arc<dyn JwksClient>,
        private_keys: Arc<dyn PrivateKeySupplier>,
    ) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            jwks_client,
            private_keys,
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Download and parse the JWKS.
    pub(crate) fn fetch_jwks(&self) -> Result<Jwks> {
        let raw = self.jwks_client.get_jwks(&self.jwks_url)?;
        serde_json::from_str(&raw)
            .map_err(|e| PseudoError::InvalidDomainDocument(format!("invalid JWKS: {e}")))
    }

    pub(crate) fn private_keys(&self) -> &dyn PrivateKeySupplier {
        self.private_keys.as_ref()
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySource")
            .field("jwks_url", &self.jwks_url)
            .finish_non_exhaustive()
    }
}

/// A JSON Web Key Set, reduced to the fields used here.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,

    #[serde(default, rename = "x5t#S256")]
    pub x5t_s256: Option<String>,

    #[serde(default)]
    pub x5c: Option<Vec<String>>,
}

impl Jwks {
    pub fn key_by_id(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

impl Jwk {
    /// The `x5t#S256` thumbprint, computed from the first `x5c` certificate
    /// when the JWK does not carry it.
    pub fn certificate_thumbprint(&self) -> Option<String> {
        if let Some(thumbprint) = &self.x5t_s256 {
            return Some(thumbprint.clone());
        }
        let der = Base64Flavor::Standard.decode(self.x5c.as_ref()?.first()?).ok()?;
        Some(certificate_thumbprint(&der))
    }
}

/// Base64url (unpadded) SHA-256 of a DER certificate.
pub fn certificate_thumbprint(der: &[u8]) -> String {
    b64url_encode(Sha256::digest(der))
}

#[derive(Debug, Deserialize)]
struct GeneralJwe {
    protected: String,
    iv: String,
    ciphertext: String,
    tag: String,
    #[serde(default)]
    recipients: Vec<Recipient>,
}

#[derive(Debug, Deserialize)]
struct Recipient {
    #[serde(default)]
    header: serde_json::Map<String, serde_json::Value>,
    encrypted_key: String,
}

impl Recipient {
    fn header_str(&self, name: &str) -> Option<&str> {
        self.header.get(name).and_then(serde_json::Value::as_str)
    }
}

#[derive(Deserialize)]
struct OctJwk {
    kty: String,
    k: String,
    alg: String,
}

fn decode(part: &str, what: &str) -> Result<Vec<u8>> {
    b64url_decode(part)
        .map_err(|e| PseudoError::InvalidDomainDocument(format!("{what} is not base64url: {e}")))
}

/// Unwrap one encoded secret key. `Ok(None)` means the key was not wrapped
/// for us (no recipient with our `jku`).
pub(crate) fn unwrap_secret_key(
    encoded: &serde_json::Value,
    source: &KeySource,
    jwks: &Jwks,
) -> Result<Option<SecretKey>> {
    let jwe: GeneralJwe = serde_json::from_value(encoded.clone())
        .map_err(|e| PseudoError::InvalidDomainDocument(format!("invalid encoded key: {e}")))?;

    let Some(recipient) = jwe
        .recipients
        .iter()
        .find(|r| r.header_str("jku") == Some(source.jwks_url()))
    else {
        debug!(jku = %source.jwks_url(), "secret key has no recipient for this client");
        return Ok(None);
    };

    let recipient_kid = recipient.header_str("kid").unwrap_or_default();
    let thumbprint = jwks
        .key_by_id(recipient_kid)
        .and_then(Jwk::certificate_thumbprint)
        .ok_or_else(|| {
            PseudoError::InvalidDomainDocument(format!(
                "recipient kid `{recipient_kid}` has no certificate thumbprint in the JWKS"
            ))
        })?;
    let private_key = source.private_keys().get_by_hash(&thumbprint).ok_or_else(|| {
        warn!(thumbprint = %thumbprint, "no private key for recipient certificate");
        PseudoError::Crypto(format!("no private key for certificate `{thumbprint}`"))
    })?;

    let encrypted_key = decode(&recipient.encrypted_key, "encrypted_key")?;
    let cek = private_key
        .decrypt(Oaep::new_with_mgf_hash::<Sha256, Sha1>(), &encrypted_key)
        .map_err(|e| PseudoError::Crypto(format!("cannot unwrap content encryption key: {e}")))?;

    let plaintext = aes_gcm_open(
        &cek,
        &decode(&jwe.iv, "iv")?,
        &decode(&jwe.ciphertext, "ciphertext")?,
        &decode(&jwe.tag, "tag")?,
        jwe.protected.as_bytes(),
    )
    .map_err(|e| PseudoError::Crypto(format!("cannot decrypt secret key: {e}")))?;

    let jwk: OctJwk = serde_json::from_slice(&plaintext)
        .map_err(|e| PseudoError::InvalidDomainDocument(format!("invalid secret key JWK: {e}")))?;
    if jwk.kty != "oct" {
        return Err(PseudoError::InvalidDomainDocument(format!(
            "secret key JWK has kty `{}`, expected `oct`",
            jwk.kty
        )));
    }
    let method = EncryptionMethod::from_name(&jwk.alg).ok_or_else(|| {
        PseudoError::InvalidDomainDocument(format!("unsupported secret key alg `{}`", jwk.alg))
    })?;
    let key = SecretKey::new(decode(&jwk.k, "k")?, method)
        .map_err(|e| PseudoError::InvalidDomainDocument(e.to_string()))?;
    Ok(Some(key))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transit::jwe::aes_gcm_seal;
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use std::collections::HashMap;
    use std::sync::OnceLock;

    pub(crate) const JWKS_URL: &str = "https://client.example/.well-known/jwks.json";
    pub(crate) const CERT: &[u8] = b"not really a DER certificate";

    pub(crate) fn rsa_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap())
    }

    pub(crate) struct StaticJwks(pub String);

    impl JwksClient for StaticJwks {
        fn get_jwks(&self, _jwks_url: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    pub(crate) struct StaticKeys(pub HashMap<String, RsaPrivateKey>);

    impl PrivateKeySupplier for StaticKeys {
        fn get_by_hash(&self, hash: &str) -> Option<RsaPrivateKey> {
            self.0.get(hash).cloned()
        }

        fn get_by_alias(&self, _alias: &str) -> Option<RsaPrivateKey> {
            None
        }
    }

    pub(crate) fn key_source() -> KeySource {
        let jwks = serde_json::json!({
            "keys": [{ "kty": "RSA", "kid": "client-enc", "x5c": [Base64Flavor::Standard.encode(CERT)] }]
        });
        let mut keys = HashMap::new();
        keys.insert(certificate_thumbprint(CERT), rsa_key().clone());
        KeySource::new(
            JWKS_URL,
            Arc::new(StaticJwks(jwks.to_string())),
            Arc::new(StaticKeys(keys)),
        )
    }

    /// Wrap `key` for the test client the way the authority does.
    pub(crate) fn wrap(key: &SecretKey, jku: &str) -> serde_json::Value {
        let jwk = serde_json::json!({
            "kty": "oct",
            "k": b64url_encode(key.as_bytes()),
            "alg": key.method().name(),
        });
        let protected = b64url_encode(br#"{"enc":"A256GCM"}"#);
        let cek = SecretKey::generate(EncryptionMethod::A256Gcm);
        let (iv, ciphertext, tag) =
            aes_gcm_seal(cek.as_bytes(), jwk.to_string().as_bytes(), protected.as_bytes()).unwrap();
        let encrypted_key = RsaPublicKey::from(rsa_key())
            .encrypt(
                &mut rand::rngs::OsRng,
                Oaep::new_with_mgf_hash::<Sha256, Sha1>(),
                cek.as_bytes(),
            )
            .unwrap();
        serde_json::json!({
            "protected": protected,
            "iv": b64url_encode(iv),
            "ciphertext": b64url_encode(ciphertext),
            "tag": b64url_encode(tag),
            "recipients": [
                { "header": { "alg": "RSA-OAEP-256", "kid": "someone-else", "jku": "https://other.example/jwks" },
                  "encrypted_key": b64url_encode([0u8; 16]) },
                { "header": { "alg": "RSA-OAEP-256", "kid": "client-enc", "jku": jku },
                  "encrypted_key": b64url_encode(encrypted_key) }
            ]
        })
    }

    #[test]
    fn test_unwrap_secret_key() {
        let source = key_source();
        let jwks = source.fetch_jwks().unwrap();
        let key = SecretKey::generate(EncryptionMethod::A192Gcm);
        let unwrapped = unwrap_secret_key(&wrap(&key, JWKS_URL), &source, &jwks)
            .unwrap()
            .unwrap();
        assert_eq!(unwrapped, key);
    }

    #[test]
    fn test_key_for_other_client_is_skipped() {
        let source = key_source();
        let jwks = source.fetch_jwks().unwrap();
        let key = SecretKey::generate(EncryptionMethod::A128Gcm);
        let wrapped = wrap(&key, "https://third.example/jwks");
        assert!(unwrap_secret_key(&wrapped, &source, &jwks).unwrap().is_none());
    }

    #[test]
    fn test_missing_private_key_is_an_error() {
        let source = KeySource::new(
            JWKS_URL,
            Arc::new(StaticJwks(
                serde_json::json!({ "keys": [{ "kid": "client-enc", "x5t#S256": "unknown" }] }).to_string(),
            )),
            Arc::new(StaticKeys(HashMap::new())),
        );
        let jwks = source.fetch_jwks().unwrap();
        let wrapped = wrap(&SecretKey::generate(EncryptionMethod::A256Gcm), JWKS_URL);
        assert!(matches!(
            unwrap_secret_key(&wrapped, &source, &jwks),
            Err(PseudoError::Crypto(_))
        ));
    }

    #[test]
    fn test_thumbprint_prefers_explicit_x5t() {
        let jwk = Jwk {
            kid: None,
            x5t_s256: Some("explicit".into()),
            x5c: Some(vec![Base64Flavor::Standard.encode(CERT)]),
        };
        assert_eq!(jwk.certificate_thumbprint().as_deref(), Some("explicit"));
        let jwk = Jwk { x5t_s256: None, ..jwk };
        assert_eq!(jwk.certificate_thumbprint(), Some(certificate_thumbprint(CERT)));
    }
}
