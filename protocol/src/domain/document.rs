//! Domain documents served by the authority.
//!
//! ```json
//! {
//!   "domain": "https://example.com/domains/uhmep_v1",
//!   "crv": "P-521",
//!   "audience": "https://example.com/domains/uhmep_v1",
//!   "bufferSize": 8,
//!   "timeToLiveInTransit": "PT10M",
//!   "secretKeys": [ { "kid": "...", "active": true, "encoded": { <general JWE> } } ]
//! }
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::curve::NamedCurve;
use crate::domain::key_unwrap::{unwrap_secret_key, Jwks, KeySource};
use crate::domain::{Domain, RefreshScheduler};
use crate::error::{PseudoError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DomainDocument {
    pub domain: String,
    pub crv: String,
    pub audience: String,
    pub buffer_size: usize,
    pub time_to_live_in_transit: String,
    #[serde(default)]
    pub secret_keys: Vec<SecretKeyEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SecretKeyEntry {
    pub kid: String,
    #[serde(default)]
    pub active: bool,
    pub encoded: serde_json::Value,
}

impl DomainDocument {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| PseudoError::InvalidDomainDocument(format!("cannot parse domain: {e}")))
    }

    /// Build the domain, unwrapping the secret keys meant for this client.
    /// Without a key source the domain has no secret keys.
    pub fn into_domain(
        self,
        keys: Option<(&KeySource, &Jwks)>,
        refresher: Option<Weak<dyn RefreshScheduler>>,
    ) -> Result<Arc<Domain>> {
        let curve = NamedCurve::from_name(&self.crv).ok_or_else(|| {
            PseudoError::InvalidDomainDocument(format!("unsupported curve `{}`", self.crv))
        })?;
        let ttl = parse_iso8601_duration(&self.time_to_live_in_transit)?;

        let mut builder = Domain::builder(&self.domain, curve)
            .audience(&self.audience)
            .buffer_size(self.buffer_size)
            .in_transit_ttl(ttl);
        if let Some(refresher) = refresher {
            builder = builder.refresher(refresher);
        }

        let mut unwrapped = HashSet::new();
        if let Some((source, jwks)) = keys {
            for entry in &self.secret_keys {
                if let Some(key) = unwrap_secret_key(&entry.encoded, source, jwks)? {
                    unwrapped.insert(entry.kid.clone());
                    builder = builder.secret_key(&entry.kid, key);
                }
            }
        }

        match self.secret_keys.iter().find(|entry| entry.active) {
            Some(active) if unwrapped.contains(&active.kid) => {
                builder = builder.active_kid(&active.kid);
            }
            Some(active) => {
                warn!(
                    domain = %self.domain,
                    kid = %active.kid,
                    "active secret key is not available to this client"
                );
            }
            None => debug!(domain = %self.domain, "domain has no active secret key"),
        }

        builder.build()
    }
}

/// Parse an ISO-8601 duration of the form `PnDTnHnMn.nS` (the subset used by
/// `timeToLiveInTransit`).
pub fn parse_iso8601_duration(text: &str) -> Result<Duration> {
    let invalid = || PseudoError::InvalidDomainDocument(format!("invalid ISO-8601 duration `{text}`"));

    let rest = text
        .strip_prefix('P')
        .or_else(|| text.strip_prefix('p'))
        .ok_or_else(invalid)?;
    let (date_part, time_part) = match rest.find(['T', 't']) {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };
    if date_part.is_empty() && time_part.map_or(true, str::is_empty) {
        return Err(invalid());
    }

    let mut total = 0f64;
    for (number, unit) in components(date_part).ok_or_else(invalid)? {
        total += match unit {
            'D' | 'd' => number * 86_400.0,
            _ => return Err(invalid()),
        };
    }
    if let Some(time_part) = time_part {
        if time_part.is_empty() {
            return Err(invalid());
        }
        for (number, unit) in components(time_part).ok_or_else(invalid)? {
            total += match unit {
                'H' | 'h' => number * 3_600.0,
                'M' | 'm' => number * 60.0,
                'S' | 's' => number,
                _ => return Err(invalid()),
            };
        }
    }

    if !total.is_finite() || total < 0.0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs_f64(total))
}

/// Split `"1H30M"` into `[(1.0, 'H'), (30.0, 'M')]`.
fn components(text: &str) -> Option<Vec<(f64, char)>> {
    let mut out = Vec::new();
    let mut number = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(if c == ',' { '.' } else { c });
        } else {
            if number.is_empty() {
                return None;
            }
            out.push((number.parse().ok()?, c));
            number.clear();
        }
    }
    number.is_empty().then_some(out)
}
