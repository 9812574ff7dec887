//! # Domain Registry
//!
//! Keeps the home domain and the additional domains declared at build time
//! fresh, and hands out immutable [`Domain`] snapshots.
//!
//! ## Refresh
//!
//! - All declared domains are fetched in parallel, one scoped thread each.
//!   The refresh is all-or-nothing: one failure leaves the previous
//!   snapshots in place.
//! - Only one refresh runs at a time. A caller that finds a refresh in
//!   progress returns immediately instead of waiting.
//! - After each attempt the next refresh is held back by a cooldown
//!   ([`RegistryConfig::refresh_cooldown`], or the shorter
//!   [`RegistryConfig::initial_retry_cooldown`] while nothing was ever
//!   loaded) so a burst of unknown kids cannot hammer the authority.
//! - Domains hold a weak handle to the registry and schedule a background
//!   refresh when asked for a secret key they do not have.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::{JwksClient, PrivateKeySupplier, PseudonymisationClient};
use crate::config::RegistryConfig;
use crate::domain::document::DomainDocument;
use crate::domain::key_unwrap::{Jwks, KeySource};
use crate::domain::{Domain, RefreshScheduler};
use crate::error::{PseudoError, Result};

#[derive(Debug, Default)]
struct RefreshState {
    next_allowed: Option<Instant>,
}

struct RegistryInner {
    home: String,
    /// Every declared domain; `None` until first loaded.
    domains: DashMap<String, Option<Arc<Domain>>>,
    client: Arc<dyn PseudonymisationClient>,
    key_source: Option<KeySource>,
    config: RegistryConfig,
    refresh: Mutex<RefreshState>,
    /// Set once a refresh has succeeded; readable while one is in flight.
    initialized: AtomicBool,
    this: Weak<RegistryInner>,
}

/// Shared handle to the domains. Cloning is cheap.
#[derive(Clone)]
pub struct DomainRegistry {
    inner: Arc<RegistryInner>,
}

/// Builder for [`DomainRegistry`].
pub struct DomainRegistryBuilder {
    home: String,
    client: Arc<dyn PseudonymisationClient>,
    additional: Vec<String>,
    key_source: Option<KeySource>,
    config: RegistryConfig,
}

impl DomainRegistryBuilder {
    /// Other domains this client converts pseudonyms to or from.
    pub fn additional_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional.extend(domains.into_iter().map(Into::into));
        self
    }

    /// Where to find the client's keys. Without it no transit info can be
    /// sealed or opened.
    pub fn key_source(mut self, key_source: KeySource) -> Self {
        self.key_source = Some(key_source);
        self
    }

    /// Shorthand for [`key_source`](Self::key_source).
    pub fn jwks(
        self,
        jwks_url: impl Into<String>,
        jwks_client: Arc<dyn JwksClient>,
        private_keys: Arc<dyn PrivateKeySupplier>,
    ) -> Self {
        self.key_source(KeySource::new(jwks_url, jwks_client, private_keys))
    }

    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the registry and, unless disabled, load the domains. A failed
    /// initial load is logged, not returned: lookups report
    /// [`PseudoError::DomainNotLoaded`] and retry in the background.
    pub fn build(self) -> DomainRegistry {
        if self.key_source.is_none() {
            warn!(
                domain = %self.home,
                "no JWKS / private key supplier: this registry will not be able to encrypt nor decrypt any transit info"
            );
        }

        let domains = DashMap::new();
        domains.insert(self.home.clone(), None);
        for key in self.additional {
            domains.insert(key, None);
        }

        let refresh_on_build = self.config.refresh_on_build;
        let inner = Arc::new_cyclic(|this| RegistryInner {
            home: self.home,
            domains,
            client: self.client,
            key_source: self.key_source,
            config: self.config,
            refresh: Mutex::new(RefreshState::default()),
            initialized: AtomicBool::new(false),
            this: this.clone(),
        });

        if refresh_on_build {
            if let Err(e) = inner.refresh_domains() {
                error!(
                    domain = %inner.home,
                    error = %e,
                    "error during the initialization of the domains: the registry will not be usable until it is initialized"
                );
            }
        }
        DomainRegistry { inner }
    }
}

impl DomainRegistry {
    pub fn builder(
        home_domain: impl Into<String>,
        client: Arc<dyn PseudonymisationClient>,
    ) -> DomainRegistryBuilder {
        DomainRegistryBuilder {
            home: home_domain.into(),
            client,
            additional: Vec::new(),
            key_source: None,
            config: RegistryConfig::default(),
        }
    }

    pub fn home_domain_key(&self) -> &str {
        &self.inner.home
    }

    /// The home domain.
    pub fn domain(&self) -> Result<Arc<Domain>> {
        self.inner.domain_by_key(&self.inner.home)
    }

    /// A declared domain. Fails with [`PseudoError::DomainNotLoaded`] (and
    /// schedules a refresh) when it was never loaded, and with
    /// [`PseudoError::UnknownDomain`] when it was never declared.
    pub fn domain_by_key(&self, key: &str) -> Result<Arc<Domain>> {
        self.inner.domain_by_key(key)
    }

    /// Reload every declared domain now, subject to the cooldown. Returns
    /// `Ok(())` without doing anything when a refresh is already running or
    /// the cooldown has not elapsed.
    pub fn refresh_domains(&self) -> Result<()> {
        self.inner.refresh_domains()
    }

    /// Run [`refresh_domains`](Self::refresh_domains) on a background thread.
    pub fn refresh_domains_asynchronously(&self) {
        self.inner.refresh_domains_asynchronously();
    }

    /// `true` once a refresh has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Keys of every declared domain, home domain included.
    pub fn domain_keys(&self) -> Vec<String> {
        self.inner.domains.iter().map(|e| e.key().clone()).collect()
    }

    pub fn client(&self) -> &Arc<dyn PseudonymisationClient> {
        &self.inner.client
    }
}

impl fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("home", &self.inner.home)
            .field("domains", &self.domain_keys())
            .field("key_source", &self.inner.key_source)
            .finish()
    }
}

impl RegistryInner {
    fn domain_by_key(&self, key: &str) -> Result<Arc<Domain>> {
        let entry = self.domains.get(key).map(|e| e.value().clone());
        match entry {
            Some(Some(domain)) => Ok(domain),
            Some(None) => {
                self.refresh_domains_asynchronously();
                Err(PseudoError::DomainNotLoaded(key.to_string()))
            }
            None => Err(PseudoError::UnknownDomain(key.to_string())),
        }
    }

    fn refresh_domains(&self) -> Result<()> {
        let Some(mut state) = self.refresh.try_lock() else {
            debug!("domain refresh already in progress");
            return Ok(());
        };
        let now = Instant::now();
        if state.next_allowed.is_some_and(|next| now < next) {
            debug!("domain refresh skipped: cooldown not elapsed");
            return Ok(());
        }

        match self.load_all() {
            Ok(domains) => {
                let count = domains.len();
                for domain in domains {
                    self.domains.insert(domain.key().to_string(), Some(domain));
                }
                self.initialized.store(true, Ordering::Release);
                state.next_allowed = Some(now + self.config.refresh_cooldown);
                info!(home = %self.home, count, "domains refreshed");
                Ok(())
            }
            Err(e) => {
                let cooldown = if self.initialized.load(Ordering::Acquire) {
                    self.config.refresh_cooldown
                } else {
                    self.config.initial_retry_cooldown
                };
                state.next_allowed = Some(now + cooldown);
                warn!(
                    home = %self.home,
                    error = %e,
                    retry_in_ms = cooldown.as_millis() as u64,
                    "domain refresh failed"
                );
                Err(e)
            }
        }
    }

    fn load_all(&self) -> Result<Vec<Arc<Domain>>> {
        let keys: Vec<String> = self.domains.iter().map(|e| e.key().clone()).collect();
        let jwks = self.key_source.as_ref().map(KeySource::fetch_jwks).transpose()?;
        let key_material = self.key_source.as_ref().zip(jwks.as_ref());

        thread::scope(|scope| {
            let handles: Vec<_> = keys
                .iter()
                .map(|key| scope.spawn(move || self.load_domain(key, key_material)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(PseudoError::Transport("domain loader panicked".to_string()))
                    })
                })
                .collect()
        })
    }

    fn load_domain(&self, key: &str, key_material: Option<(&KeySource, &Jwks)>) -> Result<Arc<Domain>> {
        let raw = self.client.get_domain(key)?;
        let refresher: Weak<dyn RefreshScheduler> = self.this.clone();
        let domain = DomainDocument::parse(&raw)?.into_domain(key_material, Some(refresher))?;
        if domain.key() != key {
            return Err(PseudoError::InvalidDomainDocument(format!(
                "requested domain `{key}` but the authority described `{}`",
                domain.key()
            )));
        }
        debug!(domain = %key, active_kid = ?domain.active_kid(), "domain loaded");
        Ok(domain)
    }

    /// Cheap pre-check so a burst of misses does not spawn a thread each.
    fn refresh_allowed(&self) -> bool {
        match self.refresh.try_lock() {
            Some(state) => state.next_allowed.map_or(true, |next| Instant::now() >= next),
            None => false,
        }
    }

    fn refresh_domains_asynchronously(&self) {
        if !self.refresh_allowed() {
            return;
        }
        let Some(inner) = self.this.upgrade() else {
            return;
        };
        let spawned = thread::Builder::new()
            .name("domain-refresh".to_string())
            .spawn(move || {
                if let Err(e) = inner.refresh_domains() {
                    warn!(error = %e, "background domain refresh failed");
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "cannot spawn the domain refresh thread");
        }
    }
}

impl RefreshScheduler for RegistryInner {
    fn schedule_refresh(&self) {
        self.refresh_domains_asynchronously();
    }
}
