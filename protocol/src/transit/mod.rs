//! # Transit Info
//!
//! A pseudonym in transit carries a *transit info*: a compact JWE, encrypted
//! with a symmetric key of its domain, whose payload holds the scalar that
//! turns the in-transit point back into the pseudonym at rest.
//!
//! ```text
//! protected header  {"alg":"dir","enc":"A256GCM","kid":"<key id>","aud":"<domain audience>"}
//! payload           {"iat":<seconds>,"exp":<seconds>,"scalar":"<base64 signed big-endian>"}
//! ```
//!
//! The raw string is kept as received; parsing happens lazily on first use
//! and is cached. Two transit infos are equal when their raw strings are.

pub mod jwe;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use num_bigint::{BigInt, BigUint, Sign};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{TRANSIT_INFO_ALGORITHM, TRANSIT_INFO_CLOCK_SKEW};
use crate::domain::Domain;
use crate::encoding::Base64Flavor;
use crate::error::{PseudoError, Result};

use self::jwe::{CompactJwe, EncryptionMethod, JweHeader};

/// Decrypted payload of a transit info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitClaims {
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Standard Base64 of the scalar as a signed big-endian integer.
    pub scalar: String,
}

impl TransitClaims {
    pub fn new(scalar: &BigUint, now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            iat: now.timestamp(),
            exp: now.timestamp().saturating_add(ttl),
            scalar: encode_scalar(scalar),
        }
    }

    pub fn scalar(&self) -> Result<BigUint> {
        decode_scalar(&self.scalar)
    }

    /// Reject claims issued in the future or already expired, tolerating
    /// [`TRANSIT_INFO_CLOCK_SKEW`] either way.
    pub fn check_validity(&self, now: DateTime<Utc>) -> Result<()> {
        let skew = TRANSIT_INFO_CLOCK_SKEW.as_secs() as i64;
        let now = now.timestamp();
        if self.iat > now + skew {
            return Err(PseudoError::InvalidTransitInfo(format!(
                "issued in the future (iat = {})",
                self.iat
            )));
        }
        if self.exp < now - skew {
            return Err(PseudoError::InvalidTransitInfo(format!(
                "expired (exp = {})",
                self.exp
            )));
        }
        Ok(())
    }
}

/// Encode a scalar the way the authority expects: two's-complement
/// big-endian (a leading zero byte when the top bit is set), standard Base64.
pub fn encode_scalar(scalar: &BigUint) -> String {
    let signed = BigInt::from_biguint(Sign::Plus, scalar.clone());
    Base64Flavor::Standard.encode(signed.to_signed_bytes_be())
}

pub fn decode_scalar(encoded: &str) -> Result<BigUint> {
    let bytes = Base64Flavor::Standard
        .decode(encoded)
        .map_err(|_| PseudoError::InvalidTransitInfo("scalar is not valid base64".to_string()))?;
    BigInt::from_signed_bytes_be(&bytes)
        .to_biguint()
        .ok_or_else(|| PseudoError::InvalidTransitInfo("scalar is negative".to_string()))
}

/// The encrypted context travelling with a pseudonym in transit.
#[derive(Clone)]
pub struct TransitInfo {
    raw: String,
    parsed: OnceLock<std::result::Result<CompactJwe, String>>,
}

impl TransitInfo {
    /// Wrap a raw compact JWE. Nothing is parsed until the content is needed.
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            parsed: OnceLock::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn jwe(&self) -> Result<&CompactJwe> {
        self.parsed
            .get_or_init(|| parse_and_check(&self.raw))
            .as_ref()
            .map_err(|reason| PseudoError::InvalidTransitInfo(reason.clone()))
    }

    /// The `aud` header: the audience of the domain this info belongs to.
    pub fn audience(&self) -> Result<&str> {
        self.jwe()?
            .header()
            .aud
            .as_deref()
            .ok_or_else(|| PseudoError::InvalidTransitInfo("missing audience".to_string()))
    }

    /// The `kid` header, if any.
    pub fn kid(&self) -> Result<Option<&str>> {
        Ok(self.jwe()?.header().kid.as_deref())
    }

    /// The content encryption method named in the header.
    pub fn encryption_method(&self) -> Result<EncryptionMethod> {
        let enc = self.jwe()?.header().enc.as_deref().unwrap_or_default();
        EncryptionMethod::from_name(enc)
            .ok_or_else(|| PseudoError::InvalidTransitInfo(format!("unsupported enc `{enc}`")))
    }

    /// Check that the header is well formed and addressed to `domain`.
    pub fn validate_header(&self, domain: &Domain) -> Result<()> {
        let audience = self.audience()?;
        if audience != domain.audience() {
            return Err(PseudoError::InvalidTransitInfo(format!(
                "audience mismatch: expected `{}`, got `{}`",
                domain.audience(),
                audience
            )));
        }
        Ok(())
    }

    /// Encrypt `claims` with the active key of `domain`.
    pub(crate) fn seal(domain: &Domain, claims: &TransitClaims) -> Result<Self> {
        let (kid, key) = domain.active_key().ok_or_else(|| {
            PseudoError::InvalidTransitInfo(format!(
                "domain `{}` has no active secret key",
                domain.key()
            ))
        })?;

        let payload = serde_json::to_vec(claims)
            .map_err(|e| PseudoError::InvalidTransitInfo(format!("cannot serialize claims: {e}")))?;
        let header = JweHeader {
            alg: TRANSIT_INFO_ALGORITHM.to_string(),
            enc: Some(key.method().name().to_string()),
            kid: Some(kid.to_string()),
            aud: Some(domain.audience().to_string()),
        };

        let raw = CompactJwe::encrypt_direct(&header, key, &payload)
            .map_err(|e| PseudoError::InvalidTransitInfo(e.to_string()))?;
        Ok(Self::new(raw))
    }

    /// Decrypt the payload with the matching key of `domain`. An unknown `kid`
    /// schedules a refresh of the domains before failing.
    pub(crate) fn open(&self, domain: &Domain) -> Result<TransitClaims> {
        self.validate_header(domain)?;
        let jwe = self.jwe()?;
        let kid = jwe
            .header()
            .kid
            .as_deref()
            .ok_or_else(|| PseudoError::InvalidTransitInfo("missing kid".to_string()))?;

        let key = domain.secret_key(kid).ok_or_else(|| {
            debug!(domain = %domain.key(), kid = %kid, "no secret key for transit info");
            PseudoError::UnknownKid {
                kid: kid.to_string(),
            }
        })?;

        let payload = jwe
            .decrypt_direct(key)
            .map_err(|e| PseudoError::InvalidTransitInfo(e.to_string()))?;
        serde_json::from_slice(&payload)
            .map_err(|e| PseudoError::InvalidTransitInfo(format!("invalid claims: {e}")))
    }
}

fn parse_and_check(raw: &str) -> std::result::Result<CompactJwe, String> {
    let jwe = CompactJwe::parse(raw).map_err(|e| e.to_string())?;
    let header = jwe.header();
    if header.alg != TRANSIT_INFO_ALGORITHM {
        return Err(format!("unsupported alg `{}`", header.alg));
    }
    if !jwe.encrypted_key().is_empty() {
        return Err("encrypted key must be empty with direct encryption".to_string());
    }
    match header.enc.as_deref() {
        Some(enc) if EncryptionMethod::from_name(enc).is_some() => {}
        Some(enc) => return Err(format!("unsupported enc `{enc}`")),
        None => return Err("missing enc".to_string()),
    }
    match header.aud.as_deref() {
        Some(aud) if !aud.trim().is_empty() => Ok(jwe),
        _ => Err("missing audience".to_string()),
    }
}

impl PartialEq for TransitInfo {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for TransitInfo {}

impl Hash for TransitInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for TransitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for TransitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransitInfo").field(&self.raw).finish()
    }
}

impl From<String> for TransitInfo {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for TransitInfo {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::NamedCurve;
    use crate::encoding::b64url_encode;
    use crate::transit::jwe::SecretKey;
    use chrono::Duration as ChronoDuration;

    fn domain_with_key() -> std::sync::Arc<Domain> {
        Domain::builder("https://example.com/domains/test", NamedCurve::P521)
            .audience("https://example.com/domains/test")
            .buffer_size(4)
            .in_transit_ttl(Duration::from_secs(600))
            .secret_key("k1", SecretKey::generate(EncryptionMethod::A256Gcm))
            .active_kid("k1")
            .build()
            .unwrap()
    }

    /// A compact JWE with the given header and encrypted key; the remaining
    /// parts are well-formed but never decrypted.
    fn with_header(header: &JweHeader, encrypted_key: &[u8]) -> TransitInfo {
        TransitInfo::new(format!(
            "{}.{}.{}.{}.{}",
            b64url_encode(serde_json::to_vec(header).unwrap()),
            b64url_encode(encrypted_key),
            b64url_encode([0u8; 12]),
            b64url_encode(b"ciphertext"),
            b64url_encode([0u8; 16])
        ))
    }

    fn valid_header(domain: &Domain) -> JweHeader {
        JweHeader {
            alg: "dir".into(),
            enc: Some("A256GCM".into()),
            kid: Some("k1".into()),
            aud: Some(domain.audience().to_string()),
        }
    }

    fn claims(domain: &Domain) -> TransitClaims {
        TransitClaims::new(&BigUint::from(7u32), Utc::now(), domain.in_transit_ttl())
    }

    #[test]
    fn test_scalar_encoding_matches_signed_big_endian() {
        // 0x80 needs a leading zero byte to stay positive.
        let scalar = BigUint::from(0x80u32);
        assert_eq!(encode_scalar(&scalar), Base64Flavor::Standard.encode([0x00, 0x80]));
        assert_eq!(decode_scalar(&encode_scalar(&scalar)).unwrap(), scalar);
    }

    #[test]
    fn test_negative_scalar_is_rejected() {
        let encoded = Base64Flavor::Standard.encode([0xff]);
        assert!(decode_scalar(&encoded).unwrap_err().is_invalid_transit_info());
    }

    #[test]
    fn test_seal_and_open() {
        let domain = domain_with_key();
        let now = Utc::now();
        let scalar = BigUint::from(123_456_789u64);
        let claims = TransitClaims::new(&scalar, now, domain.in_transit_ttl());
        let info = TransitInfo::seal(&domain, &claims).unwrap();

        assert_eq!(info.audience().unwrap(), domain.audience());
        assert_eq!(info.kid().unwrap(), Some("k1"));
        assert_eq!(info.encryption_method().unwrap(), EncryptionMethod::A256Gcm);

        let claims = info.open(&domain).unwrap();
        assert_eq!(claims.scalar().unwrap(), scalar);
        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.exp, now.timestamp() + 600);
    }

    #[test]
    fn test_open_with_unknown_kid() {
        let sealed_by = domain_with_key();
        let info = TransitInfo::seal(&sealed_by, &claims(&sealed_by)).unwrap();

        // Same audience, but only `k2` is known.
        let other = Domain::builder(sealed_by.key(), NamedCurve::P521)
            .audience(sealed_by.audience())
            .secret_key("k2", SecretKey::generate(EncryptionMethod::A256Gcm))
            .active_kid("k2")
            .build()
            .unwrap();

        match info.open(&other) {
            Err(PseudoError::UnknownKid { kid }) => assert_eq!(kid, "k1"),
            other => panic!("expected UnknownKid, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_header_rejects_other_audience() {
        let domain = domain_with_key();
        let info = TransitInfo::seal(&domain, &claims(&domain)).unwrap();
        let other = Domain::builder("https://example.com/domains/other", NamedCurve::P521)
            .audience("https://example.com/domains/other")
            .build()
            .unwrap();
        assert!(info.validate_header(&other).unwrap_err().is_invalid_transit_info());
    }

    #[test]
    fn test_hand_built_header_is_accepted() {
        let domain = domain_with_key();
        let info = with_header(&valid_header(&domain), &[]);
        assert!(info.validate_header(&domain).is_ok());
    }

    #[test]
    fn test_header_with_key_wrapping_alg_is_rejected() {
        let domain = domain_with_key();
        let header = JweHeader {
            alg: "A128KW".into(),
            ..valid_header(&domain)
        };
        let err = with_header(&header, &[]).validate_header(&domain).unwrap_err();
        assert!(err.is_invalid_transit_info());
        assert!(err.to_string().contains("unsupported alg `A128KW`"));
    }

    #[test]
    fn test_header_without_enc_is_rejected() {
        let domain = domain_with_key();
        let header = JweHeader {
            enc: None,
            ..valid_header(&domain)
        };
        let err = with_header(&header, &[]).validate_header(&domain).unwrap_err();
        assert!(err.is_invalid_transit_info());
        assert!(err.to_string().contains("missing enc"));

        let header = JweHeader {
            enc: Some("A256CBC-HS512".into()),
            ..valid_header(&domain)
        };
        assert!(with_header(&header, &[])
            .validate_header(&domain)
            .unwrap_err()
            .is_invalid_transit_info());
    }

    #[test]
    fn test_header_without_audience_is_rejected() {
        let domain = domain_with_key();
        for aud in [None, Some("  ".to_string())] {
            let header = JweHeader {
                aud,
                ..valid_header(&domain)
            };
            let err = with_header(&header, &[]).validate_header(&domain).unwrap_err();
            assert!(err.is_invalid_transit_info());
            assert!(err.to_string().contains("missing audience"));
        }
    }

    #[test]
    fn test_direct_encryption_with_encrypted_key_is_rejected() {
        let domain = domain_with_key();
        let err = with_header(&valid_header(&domain), b"wrapped key")
            .validate_header(&domain)
            .unwrap_err();
        assert!(err.is_invalid_transit_info());
        assert!(err.to_string().contains("encrypted key must be empty"));
    }

    #[test]
    fn test_garbage_is_invalid_transit_info() {
        let domain = domain_with_key();
        let info = TransitInfo::new("not-a-jwe");
        assert!(info.validate_header(&domain).unwrap_err().is_invalid_transit_info());
        // The failure is cached and reported again.
        assert!(info.audience().is_err());
    }

    #[test]
    fn test_equality_is_by_raw_string() {
        assert_eq!(TransitInfo::new("a.b.c.d.e"), TransitInfo::from("a.b.c.d.e"));
        assert_ne!(TransitInfo::new("a.b.c.d.e"), TransitInfo::new("a.b.c.d.f"));
    }

    #[test]
    fn test_claims_validity_window() {
        let now = Utc::now();
        let fresh = TransitClaims::new(&BigUint::from(1u32), now, Duration::from_secs(600));
        assert!(fresh.check_validity(now).is_ok());

        // Within the tolerated skew.
        let slightly_future = TransitClaims {
            iat: (now + ChronoDuration::seconds(30)).timestamp(),
            ..fresh.clone()
        };
        assert!(slightly_future.check_validity(now).is_ok());

        let future = TransitClaims {
            iat: (now + ChronoDuration::minutes(5)).timestamp(),
            ..fresh.clone()
        };
        assert!(future.check_validity(now).is_err());

        let expired = TransitClaims {
            exp: (now - ChronoDuration::minutes(2)).timestamp(),
            ..fresh
        };
        assert!(expired.check_validity(now).is_err());
    }
}
