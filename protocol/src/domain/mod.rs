//! # Pseudonymisation Domains
//!
//! A domain is the namespace pseudonyms live in: it fixes the curve, the
//! padding used to encode values, the audience of transit infos and the
//! symmetric keys protecting them. Domains are described by the authority in
//! a JSON document (see [`document`]) whose secret keys are wrapped for the
//! client (see [`key_unwrap`]), and are kept fresh by the [`registry`].
//!
//! A [`Domain`] is immutable. A refresh builds new instances and swaps them in
//! the registry; holders of the old `Arc<Domain>` keep a consistent view.

pub mod document;
pub mod key_unwrap;
pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use num_bigint::BigUint;
use tracing::debug;

use crate::curve::NamedCurve;
use crate::error::{PseudoError, Result};
use crate::transit::jwe::{EncryptionMethod, SecretKey};

pub use registry::{DomainRegistry, DomainRegistryBuilder};

/// Something that can refresh the domains in the background. Implemented by
/// the registry; domains hold a weak handle to it.
pub(crate) trait RefreshScheduler: Send + Sync {
    fn schedule_refresh(&self);
}

/// An immutable snapshot of a pseudonymisation domain.
pub struct Domain {
    key: String,
    curve: NamedCurve,
    audience: String,
    buffer_size: usize,
    in_transit_ttl: Duration,
    secret_keys: HashMap<String, SecretKey>,
    active_kid: Option<String>,
    refresher: Option<Weak<dyn RefreshScheduler>>,
}

impl Domain {
    /// Start building a domain by hand. Domains served by the authority are
    /// built by the registry from their document instead.
    pub fn builder(key: impl Into<String>, curve: NamedCurve) -> DomainBuilder {
        DomainBuilder::new(key.into(), curve)
    }

    /// The domain identifier, usually a URL.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn curve(&self) -> NamedCurve {
        self.curve
    }

    /// Curve name as sent on the wire.
    pub fn crv(&self) -> &'static str {
        self.curve.name()
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Number of trailing padding bytes reserved when encoding a value.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn in_transit_ttl(&self) -> Duration {
        self.in_transit_ttl
    }

    /// Maximum number of bytes a [`Value`](crate::point::value::Value) can
    /// hold in this domain.
    ///
    /// On P-256 and P-384 the encoded `x` spans every bit of the field, so a
    /// value of exactly this length whose leading bytes are high can exceed
    /// `p` and is rejected with [`PseudoError::InvalidValue`]. P-521 keeps a
    /// spare top bit and encodes every value up to the limit.
    pub fn max_value_size(&self) -> usize {
        max_value_size(self.curve, self.buffer_size)
    }

    /// Look up a secret key by `kid`. A miss schedules a refresh of the
    /// domains: the authority may have rotated its keys.
    pub fn secret_key(&self, kid: &str) -> Option<&SecretKey> {
        let key = self.secret_keys.get(kid);
        if key.is_none() {
            debug!(domain = %self.key, kid = %kid, "secret key not found");
            self.schedule_refresh();
        }
        key
    }

    pub fn active_kid(&self) -> Option<&str> {
        self.active_kid.as_deref()
    }

    /// The key used to seal new transit infos. A missing active key
    /// schedules a refresh.
    pub fn active_key(&self) -> Option<(&str, &SecretKey)> {
        let active = self
            .active_kid
            .as_deref()
            .and_then(|kid| self.secret_keys.get(kid).map(|key| (kid, key)));
        if active.is_none() {
            debug!(domain = %self.key, "no active secret key");
            self.schedule_refresh();
        }
        active
    }

    /// Encryption method of the active key.
    pub fn active_encryption_method(&self) -> Option<EncryptionMethod> {
        self.active_kid
            .as_deref()
            .and_then(|kid| self.secret_keys.get(kid))
            .map(SecretKey::method)
    }

    /// Identifiers of every secret key known for this domain.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.secret_keys.keys().map(String::as_str)
    }

    /// A fresh blinding scalar in `[1, n)`.
    pub fn random_scalar(&self) -> BigUint {
        self.curve.random_scalar(&mut rand::rngs::OsRng)
    }

    fn schedule_refresh(&self) {
        if let Some(scheduler) = self.refresher.as_ref().and_then(Weak::upgrade) {
            scheduler.schedule_refresh();
        }
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kids: Vec<&str> = self.kids().collect();
        kids.sort_unstable();
        f.debug_struct("Domain")
            .field("key", &self.key)
            .field("crv", &self.crv())
            .field("audience", &self.audience)
            .field("buffer_size", &self.buffer_size)
            .field("in_transit_ttl", &self.in_transit_ttl)
            .field("kids", &kids)
            .field("active_kid", &self.active_kid)
            .finish()
    }
}

fn max_value_size(curve: NamedCurve, buffer_size: usize) -> usize {
    (curve.params().field_bits / 8).saturating_sub(buffer_size + 1)
}

/// Builder for [`Domain`]. The audience defaults to the key, the buffer size
/// to 4 bytes and the in-transit TTL to ten minutes.
pub struct DomainBuilder {
    key: String,
    curve: NamedCurve,
    audience: Option<String>,
    buffer_size: usize,
    in_transit_ttl: Duration,
    secret_keys: HashMap<String, SecretKey>,
    active_kid: Option<String>,
    refresher: Option<Weak<dyn RefreshScheduler>>,
}

impl DomainBuilder {
    fn new(key: String, curve: NamedCurve) -> Self {
        Self {
            key,
            curve,
            audience: None,
            buffer_size: 4,
            in_transit_ttl: Duration::from_secs(600),
            secret_keys: HashMap::new(),
            active_kid: None,
            refresher: None,
        }
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn in_transit_ttl(mut self, ttl: Duration) -> Self {
        self.in_transit_ttl = ttl;
        self
    }

    pub fn secret_key(mut self, kid: impl Into<String>, key: SecretKey) -> Self {
        self.secret_keys.insert(kid.into(), key);
        self
    }

    pub fn active_kid(mut self, kid: impl Into<String>) -> Self {
        self.active_kid = Some(kid.into());
        self
    }

    pub(crate) fn refresher(mut self, refresher: Weak<dyn RefreshScheduler>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn build(self) -> Result<Arc<Domain>> {
        if self.key.trim().is_empty() {
            return Err(PseudoError::InvalidDomainDocument("domain key is blank".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(PseudoError::InvalidDomainDocument(
                "buffer size must be at least 1".to_string(),
            ));
        }
        if max_value_size(self.curve, self.buffer_size) == 0 {
            return Err(PseudoError::InvalidDomainDocument(format!(
                "buffer size {} leaves no room for values on {}",
                self.buffer_size, self.curve
            )));
        }
        if let Some(kid) = &self.active_kid {
            if !self.secret_keys.contains_key(kid) {
                return Err(PseudoError::InvalidDomainDocument(format!(
                    "active kid `{kid}` has no secret key"
                )));
            }
        }

        let audience = self.audience.unwrap_or_else(|| self.key.clone());
        Ok(Arc::new(Domain {
            key: self.key,
            curve: self.curve,
            audience,
            buffer_size: self.buffer_size,
            in_transit_ttl: self.in_transit_ttl,
            secret_keys: self.secret_keys,
            active_kid: self.active_kid,
            refresher: self.refresher,
        }))
    }
}
