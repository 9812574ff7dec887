//! # JWE Primitives
//!
//! The subset of JSON Web Encryption needed by the protocol:
//!
//! - AES-GCM content encryption with 128, 192 or 256 bit keys, with the tag
//!   carried separately from the ciphertext as JOSE requires;
//! - the compact serialization (`header.key.iv.ciphertext.tag`) used by
//!   transit infos with direct key agreement (`alg: dir`).
//!
//! The AAD of a JWE is the ASCII of the Base64url-encoded protected header,
//! so the encoded header is kept verbatim after parsing.

use std::fmt;

use aes_gcm::{
    aead::{consts::U12, Aead, KeyInit, Payload},
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH};
use crate::encoding::{b64url_decode, b64url_encode};

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Low-level JWE failures. Callers fold them into the
/// [`PseudoError`](crate::error::PseudoError) variant matching their context.
#[derive(Debug, Error)]
pub enum JweError {
    #[error("malformed JWE: {0}")]
    Malformed(String),

    #[error("unsupported content encryption `{0}`")]
    UnsupportedEncryption(String),

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("content encryption `{header}` does not match the key's `{key}`")]
    MethodMismatch {
        header: EncryptionMethod,
        key: EncryptionMethod,
    },

    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Content encryption methods (`enc`) accepted for domain secret keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMethod {
    A128Gcm,
    A192Gcm,
    A256Gcm,
}

impl EncryptionMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "A128GCM" => Some(EncryptionMethod::A128Gcm),
            "A192GCM" => Some(EncryptionMethod::A192Gcm),
            "A256GCM" => Some(EncryptionMethod::A256Gcm),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EncryptionMethod::A128Gcm => "A128GCM",
            EncryptionMethod::A192Gcm => "A192GCM",
            EncryptionMethod::A256Gcm => "A256GCM",
        }
    }

    /// Key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            EncryptionMethod::A128Gcm => 16,
            EncryptionMethod::A192Gcm => 24,
            EncryptionMethod::A256Gcm => 32,
        }
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A symmetric domain key together with the method it is meant for.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    bytes: Vec<u8>,
    method: EncryptionMethod,
}

impl SecretKey {
    pub fn new(bytes: Vec<u8>, method: EncryptionMethod) -> Result<Self, JweError> {
        if bytes.len() != method.key_len() {
            return Err(JweError::InvalidKeyLength {
                expected: method.key_len(),
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes, method })
    }

    /// A fresh random key, mostly useful to tests and tooling.
    pub fn generate(method: EncryptionMethod) -> Self {
        let mut bytes = vec![0u8; method.key_len()];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes, method }
    }

    pub fn method(&self) -> EncryptionMethod {
        self.method
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("method", &self.method)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AES-GCM
// ---------------------------------------------------------------------------

fn seal_with<C: Aead + KeyInit>(
    key: &[u8],
    iv: &[u8; AES_GCM_IV_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, JweError> {
    let cipher = C::new_from_slice(key).map_err(|_| JweError::EncryptFailed)?;
    cipher
        .encrypt(
            aes_gcm::aead::Nonce::<C>::from_slice(iv),
            Payload { msg: plaintext, aad },
        )
        .map_err(|_| JweError::EncryptFailed)
}

fn open_with<C: Aead + KeyInit>(
    key: &[u8],
    iv: &[u8],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, JweError> {
    let cipher = C::new_from_slice(key).map_err(|_| JweError::DecryptFailed)?;
    cipher
        .decrypt(
            aes_gcm::aead::Nonce::<C>::from_slice(iv),
            Payload { msg: sealed, aad },
        )
        .map_err(|_| JweError::DecryptFailed)
}

/// Encrypt with AES-GCM, picking the key size from `key`. Returns
/// `(iv, ciphertext, tag)` with a random 96-bit IV.
pub fn aes_gcm_seal(
    key: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; AES_GCM_IV_LENGTH], Vec<u8>, Vec<u8>), JweError> {
    let mut iv = [0u8; AES_GCM_IV_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut sealed = match key.len() {
        16 => seal_with::<Aes128Gcm>(key, &iv, plaintext, aad),
        24 => seal_with::<Aes192Gcm>(key, &iv, plaintext, aad),
        32 => seal_with::<Aes256Gcm>(key, &iv, plaintext, aad),
        other => Err(JweError::InvalidKeyLength { expected: 32, actual: other }),
    }?;

    // The aead crate appends the tag; JOSE carries it separately.
    let tag = sealed.split_off(sealed.len() - AES_GCM_TAG_LENGTH);
    Ok((iv, sealed, tag))
}

/// Decrypt and authenticate AES-GCM content, picking the key size from `key`.
pub fn aes_gcm_open(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, JweError> {
    if iv.len() != AES_GCM_IV_LENGTH {
        return Err(JweError::Malformed(format!(
            "IV must be {AES_GCM_IV_LENGTH} bytes, got {}",
            iv.len()
        )));
    }
    if tag.len() != AES_GCM_TAG_LENGTH {
        return Err(JweError::Malformed(format!(
            "tag must be {AES_GCM_TAG_LENGTH} bytes, got {}",
            tag.len()
        )));
    }

    let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    match key.len() {
        16 => open_with::<Aes128Gcm>(key, iv, &sealed, aad),
        24 => open_with::<Aes192Gcm>(key, iv, &sealed, aad),
        32 => open_with::<Aes256Gcm>(key, iv, &sealed, aad),
        other => Err(JweError::InvalidKeyLength { expected: 32, actual: other }),
    }
}

// ---------------------------------------------------------------------------
// Compact serialization
// ---------------------------------------------------------------------------

/// Protected header of a transit info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    pub alg: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// A parsed compact JWE.
#[derive(Debug, Clone)]
pub struct CompactJwe {
    encoded_header: String,
    header: JweHeader,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

fn decode_part(part: &str, name: &str) -> Result<Vec<u8>, JweError> {
    b64url_decode(part).map_err(|e| JweError::Malformed(format!("{name} is not base64url: {e}")))
}

impl CompactJwe {
    pub fn parse(compact: &str) -> Result<Self, JweError> {
        let parts: Vec<&str> = compact.split('.').collect();
        if parts.len() != 5 {
            return Err(JweError::Malformed(format!(
                "expected 5 dot-separated parts, got {}",
                parts.len()
            )));
        }

        let header_json = decode_part(parts[0], "protected header")?;
        let header: JweHeader = serde_json::from_slice(&header_json)
            .map_err(|e| JweError::Malformed(format!("protected header: {e}")))?;

        Ok(Self {
            encoded_header: parts[0].to_string(),
            header,
            encrypted_key: decode_part(parts[1], "encrypted key")?,
            iv: decode_part(parts[2], "IV")?,
            ciphertext: decode_part(parts[3], "ciphertext")?,
            tag: decode_part(parts[4], "tag")?,
        })
    }

    pub fn header(&self) -> &JweHeader {
        &self.header
    }

    pub fn encrypted_key(&self) -> &[u8] {
        &self.encrypted_key
    }

    /// Encrypt `plaintext` under `key` with direct key agreement and return
    /// the compact serialization. `header.enc` is overwritten with the key's
    /// method.
    pub fn encrypt_direct(
        header: &JweHeader,
        key: &SecretKey,
        plaintext: &[u8],
    ) -> Result<String, JweError> {
        let mut header = header.clone();
        header.enc = Some(key.method().name().to_string());
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| JweError::Malformed(format!("protected header: {e}")))?;
        let encoded_header = b64url_encode(header_json);

        let (iv, ciphertext, tag) =
            aes_gcm_seal(key.as_bytes(), plaintext, encoded_header.as_bytes())?;

        Ok(format!(
            "{}..{}.{}.{}",
            encoded_header,
            b64url_encode(iv),
            b64url_encode(ciphertext),
            b64url_encode(tag)
        ))
    }

    /// Decrypt with a directly shared key. The `enc` header must match the
    /// key's method.
    pub fn decrypt_direct(&self, key: &SecretKey) -> Result<Vec<u8>, JweError> {
        let enc = self
            .header
            .enc
            .as_deref()
            .ok_or_else(|| JweError::Malformed("missing `enc` header".to_string()))?;
        let method = EncryptionMethod::from_name(enc)
            .ok_or_else(|| JweError::UnsupportedEncryption(enc.to_string()))?;
        if method != key.method() {
            return Err(JweError::MethodMismatch {
                header: method,
                key: key.method(),
            });
        }
        aes_gcm_open(
            key.as_bytes(),
            &self.iv,
            &self.ciphertext,
            &self.tag,
            self.encoded_header.as_bytes(),
        )
    }
}
