//! Error types for the pseudonymisation protocol.
//!
//! Every fallible operation in this crate returns a [`PseudoError`]. The
//! variants follow the failure modes a caller can actually act on: bad input
//! (value, pseudonym, transit info), registry state (domain not loaded yet,
//! domain never declared) and remote failures (transport, malformed responses).

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PseudoError>;

/// Errors that can occur while encoding, blinding, converting or decrypting
/// pseudonyms, or while keeping domains and tokens fresh.
#[derive(Debug, Error)]
pub enum PseudoError {
    /// The plaintext cannot be encoded as a point (too long for the curve, or
    /// the decoded bytes are not what the caller asked for).
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Coordinates, SEC1 bytes, Base64 or the textual layout of a pseudonym
    /// are malformed.
    #[error("invalid pseudonym: {0}")]
    InvalidPseudonym(String),

    /// The transit info cannot be parsed, has a bad header, targets another
    /// audience, is outside its validity window, or fails to decrypt.
    #[error("invalid transit info: {0}")]
    InvalidTransitInfo(String),

    /// The key that encrypted a transit info is not known locally. Raising
    /// this schedules a background refresh of the domains.
    #[error("invalid transit info: unknown kid `{kid}` (or no private key found to decrypt it)")]
    UnknownKid {
        /// The `kid` found in the transit info header.
        kid: String,
    },

    /// The domain is declared but has not been loaded successfully yet.
    #[error("the domain `{0}` is not yet loaded")]
    DomainNotLoaded(String),

    /// The domain was never declared to the registry.
    #[error("the domain `{0}` is unknown: declare it when building the registry")]
    UnknownDomain(String),

    /// The domain document returned by the authority cannot be turned into a
    /// usable domain.
    #[error("invalid domain document: {0}")]
    InvalidDomainDocument(String),

    /// The authority answered, but the answer does not make sense.
    #[error("invalid response from the pseudonymisation service: {0}")]
    InvalidResponse(String),

    /// A remote call (authority, JWKS, token endpoint) failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The collaborator does not implement the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Key unwrapping, signing or another low-level primitive failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The client-credentials flow could not produce an access token.
    #[error("authentication error: {0}")]
    Authentication(String),
}

impl PseudoError {
    /// `true` for every transit-info failure, including [`PseudoError::UnknownKid`].
    pub fn is_invalid_transit_info(&self) -> bool {
        matches!(
            self,
            PseudoError::InvalidTransitInfo(_) | PseudoError::UnknownKid { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kid_is_an_invalid_transit_info() {
        let err = PseudoError::UnknownKid { kid: "k1".into() };
        assert!(err.is_invalid_transit_info());
        assert!(err.to_string().contains("`k1`"));
    }

    #[test]
    fn test_other_errors_are_not_transit_info_errors() {
        assert!(!PseudoError::InvalidValue("too long".into()).is_invalid_transit_info());
        assert!(!PseudoError::DomainNotLoaded("d".into()).is_invalid_transit_info());
    }
}
