//! # Collaborators
//!
//! The protocol talks to three outside parties, each behind a trait so hosts
//! can plug in their own transport:
//!
//! - [`PseudonymisationClient`]: the pseudonymisation authority (domain
//!   documents plus the pseudonymize / identify / convert endpoints);
//! - [`JwksClient`]: the JWKS endpoint listing the client's public keys;
//! - [`PrivateKeySupplier`]: the client's RSA private keys, looked up by
//!   certificate hash (to unwrap domain keys) or alias (to sign client
//!   assertions).
//!
//! The [`auth`] module provides the signed-JWT client-credentials flow
//! used to authorize calls to the authority, and [`keys`] a PEM-file backed
//! [`PrivateKeySupplier`].

pub mod auth;
pub mod keys;

use rsa::RsaPrivateKey;

use crate::error::{PseudoError, Result};

/// The pseudonymisation authority.
///
/// Payloads and responses are raw JSON strings: the engine builds and parses
/// them, implementations only move bytes.
pub trait PseudonymisationClient: Send + Sync {
    /// Fetch the JSON document describing `domain_key`.
    fn get_domain(&self, domain_key: &str) -> Result<String>;

    /// Multiply a blinded value by the domain secret.
    fn pseudonymize(&self, domain_key: &str, payload: &str) -> Result<String> {
        let _ = (domain_key, payload);
        Err(PseudoError::Unsupported("pseudonymize"))
    }

    /// Divide a blinded pseudonym in transit by the domain secret.
    fn identify(&self, domain_key: &str, payload: &str) -> Result<String> {
        let _ = (domain_key, payload);
        Err(PseudoError::Unsupported("identify"))
    }

    /// Move a blinded pseudonym from `from_domain` to `to_domain`.
    fn convert_to(&self, from_domain: &str, to_domain: &str, payload: &str) -> Result<String> {
        let _ = (from_domain, to_domain, payload);
        Err(PseudoError::Unsupported("convert_to"))
    }
}

/// Source of the JWKS document listing the client's public keys.
pub trait JwksClient: Send + Sync {
    fn get_jwks(&self, jwks_url: &str) -> Result<String>;
}

/// Access to the client's RSA private keys.
pub trait PrivateKeySupplier: Send + Sync {
    /// Key whose certificate has the given `x5t#S256` thumbprint (Base64url,
    /// unpadded SHA-256 of the DER certificate).
    fn get_by_hash(&self, hash: &str) -> Option<RsaPrivateKey>;

    /// Key registered under `alias`.
    fn get_by_alias(&self, alias: &str) -> Option<RsaPrivateKey>;
}
