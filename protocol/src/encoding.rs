//! Base64 flavours used on the wire.
//!
//! Coordinates travel as standard Base64 in authority payloads, pseudonyms in
//! transit use URL-safe Base64 without padding, and JOSE objects use
//! URL-safe Base64 as well. Decoding of the URL-safe flavours accepts both
//! padded and unpadded input since peers are not consistent about it.

use base64::{
    alphabet,
    engine::{general_purpose::STANDARD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};

use crate::error::{PseudoError, Result};

const URL_SAFE_NO_PAD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const URL_SAFE_PADDED_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Which Base64 alphabet and padding to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Base64Flavor {
    /// RFC 4648 §4, padded.
    #[default]
    Standard,
    /// RFC 4648 §5, padded.
    UrlSafe,
    /// RFC 4648 §5, unpadded.
    UrlSafeNoPad,
}

impl Base64Flavor {
    pub fn encode(self, bytes: impl AsRef<[u8]>) -> String {
        match self {
            Base64Flavor::Standard => STANDARD.encode(bytes),
            Base64Flavor::UrlSafe => URL_SAFE_PADDED_LENIENT.encode(bytes),
            Base64Flavor::UrlSafeNoPad => URL_SAFE_NO_PAD_LENIENT.encode(bytes),
        }
    }

    pub fn decode(self, text: &str) -> Result<Vec<u8>> {
        let decoded = match self {
            Base64Flavor::Standard => STANDARD.decode(text),
            Base64Flavor::UrlSafe => URL_SAFE_PADDED_LENIENT.decode(text),
            Base64Flavor::UrlSafeNoPad => URL_SAFE_NO_PAD_LENIENT.decode(text),
        };
        decoded.map_err(|e| PseudoError::InvalidPseudonym(format!("invalid base64: {e}")))
    }
}

/// URL-safe, unpadded Base64 as used by JOSE.
pub(crate) fn b64url_encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD_LENIENT.encode(bytes)
}

/// Lenient URL-safe Base64 decoding. The caller maps the error into the
/// variant matching its context.
pub(crate) fn b64url_decode(text: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD_LENIENT.decode(text)
}
