//! PEM-file backed [`PrivateKeySupplier`].
//!
//! Each `<alias>.pem` file of a directory holds one entry: an RSA private key
//! (`PRIVATE KEY` or `RSA PRIVATE KEY`) and the certificate it belongs to
//! (`CERTIFICATE`). Keys are indexed by alias and by the Base64url SHA-256
//! thumbprint of the certificate. A lookup by thumbprint that misses reloads
//! the directory once, so rotated keys are picked up without a restart.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use tracing::{debug, info, warn};

use crate::client::PrivateKeySupplier;
use crate::domain::key_unwrap::certificate_thumbprint;
use crate::error::{PseudoError, Result};

const PEM_EXTENSION: &str = "pem";

#[derive(Default)]
struct Entries {
    by_hash: HashMap<String, RsaPrivateKey>,
    by_alias: HashMap<String, RsaPrivateKey>,
}

pub struct PemPrivateKeySupplier {
    dir: PathBuf,
    entries: RwLock<Entries>,
    reloading: Mutex<()>,
}

impl PemPrivateKeySupplier {
    /// Load every `*.pem` entry of `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let entries = load_dir(&dir)?;
        info!(dir = %dir.display(), keys = entries.by_alias.len(), "private keys loaded");
        Ok(Self {
            dir,
            entries: RwLock::new(entries),
            reloading: Mutex::new(()),
        })
    }

    /// Reload the directory. A reload already running makes this a no-op.
    pub fn refresh(&self) -> Result<()> {
        let Some(_guard) = self.reloading.try_lock() else {
            return Ok(());
        };
        let entries = load_dir(&self.dir)?;
        debug!(dir = %self.dir.display(), keys = entries.by_alias.len(), "private keys reloaded");
        *self.entries.write() = entries;
        Ok(())
    }

    pub fn aliases(&self) -> Vec<String> {
        self.entries.read().by_alias.keys().cloned().collect()
    }
}

impl PrivateKeySupplier for PemPrivateKeySupplier {
    fn get_by_hash(&self, hash: &str) -> Option<RsaPrivateKey> {
        if let Some(key) = self.entries.read().by_hash.get(hash) {
            return Some(key.clone());
        }
        if let Err(e) = self.refresh() {
            warn!(error = %e, "cannot reload private keys");
        }
        let key = self.entries.read().by_hash.get(hash).cloned();
        if key.is_none() {
            warn!(hash = %hash, "no private key found for this certificate thumbprint");
        }
        key
    }

    fn get_by_alias(&self, alias: &str) -> Option<RsaPrivateKey> {
        self.entries.read().by_alias.get(alias).cloned()
    }
}

impl fmt::Debug for PemPrivateKeySupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PemPrivateKeySupplier")
            .field("dir", &self.dir)
            .field("aliases", &self.aliases())
            .finish()
    }
}

fn load_dir(dir: &Path) -> Result<Entries> {
    let read_error = |e: std::io::Error| {
        PseudoError::Crypto(format!("cannot read key directory {}: {e}", dir.display()))
    };

    let mut entries = Entries::default();
    for item in fs::read_dir(dir).map_err(read_error)? {
        let path = item.map_err(read_error)?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(PEM_EXTENSION) {
            continue;
        }
        let Some(alias) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let text = fs::read_to_string(&path).map_err(read_error)?;
        match parse_entry(&text) {
            Ok((key, thumbprint)) => {
                entries.by_hash.insert(thumbprint, key.clone());
                entries.by_alias.insert(alias, key);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping key entry"),
        }
    }
    Ok(entries)
}

/// The private key of an entry and the thumbprint of its first certificate.
fn parse_entry(text: &str) -> Result<(RsaPrivateKey, String)> {
    let blocks = pem::parse_many(text).map_err(|e| PseudoError::Crypto(format!("invalid PEM: {e}")))?;

    let mut key = None;
    let mut thumbprint = None;
    for block in &blocks {
        match block.tag() {
            "PRIVATE KEY" if key.is_none() => {
                key = Some(RsaPrivateKey::from_pkcs8_der(block.contents()).map_err(|e| {
                    PseudoError::Crypto(format!("invalid PKCS#8 RSA key: {e}"))
                })?);
            }
            "RSA PRIVATE KEY" if key.is_none() => {
                key = Some(RsaPrivateKey::from_pkcs1_der(block.contents()).map_err(|e| {
                    PseudoError::Crypto(format!("invalid PKCS#1 RSA key: {e}"))
                })?);
            }
            "CERTIFICATE" if thumbprint.is_none() => {
                thumbprint = Some(certificate_thumbprint(block.contents()));
            }
            _ => {}
        }
    }

    match (key, thumbprint) {
        (Some(key), Some(thumbprint)) => Ok((key, thumbprint)),
        (None, _) => Err(PseudoError::Crypto("no RSA private key".to_string())),
        (_, None) => Err(PseudoError::Crypto("no certificate".to_string())),
    }
}
