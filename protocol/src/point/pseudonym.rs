//! # Pseudonyms
//!
//! A pseudonym is either **at rest**, the stable long-term identifier a
//! domain stores, or **in transit**, a randomized point plus the encrypted
//! transit info needed to get back to the pseudonym at rest.
//!
//! ```text
//! at rest     P
//! in transit  P·t⁻¹  with  transitInfo = JWE{ scalar: t, iat, exp }
//! decrypt     (P·t⁻¹)·t = P
//! ```
//!
//! The textual form of a pseudonym in transit is
//! `base64url(compressed SEC1 point) ":" transitInfo`.

use std::fmt;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tracing::debug;

use crate::config::IN_TRANSIT_SEPARATOR;
use crate::domain::Domain;
use crate::encoding::Base64Flavor;
use crate::error::{PseudoError, Result};
use crate::point::CurvePoint;
use crate::transit::{TransitClaims, TransitInfo};

/// Either kind of pseudonym.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pseudonym {
    AtRest(PseudonymAtRest),
    InTransit(PseudonymInTransit),
}

impl Pseudonym {
    pub fn point(&self) -> &CurvePoint {
        match self {
            Pseudonym::AtRest(p) => p.point(),
            Pseudonym::InTransit(p) => p.point(),
        }
    }

    pub fn domain(&self) -> &Arc<Domain> {
        self.point().domain()
    }

    /// The transit info, for pseudonyms in transit.
    pub fn transit_info(&self) -> Option<&TransitInfo> {
        match self {
            Pseudonym::AtRest(_) => None,
            Pseudonym::InTransit(p) => Some(p.transit_info()),
        }
    }
}

impl From<PseudonymAtRest> for Pseudonym {
    fn from(p: PseudonymAtRest) -> Self {
        Pseudonym::AtRest(p)
    }
}

impl From<PseudonymInTransit> for Pseudonym {
    fn from(p: PseudonymInTransit) -> Self {
        Pseudonym::InTransit(p)
    }
}

// ---------------------------------------------------------------------------
// At rest
// ---------------------------------------------------------------------------

/// The long-term pseudonym of a value in a domain: `v·s` where `s` is the
/// authority's secret for that domain.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PseudonymAtRest(CurvePoint);

impl PseudonymAtRest {
    pub fn from_point(point: CurvePoint) -> Self {
        Self(point)
    }

    pub fn point(&self) -> &CurvePoint {
        &self.0
    }

    pub fn into_point(self) -> CurvePoint {
        self.0
    }

    pub fn domain(&self) -> &Arc<Domain> {
        self.0.domain()
    }

    /// Randomize this pseudonym for sending: pick `r`, return `P·r⁻¹` with a
    /// transit info sealing `r` under the domain's active key.
    pub fn create_pseudonym_in_transit(&self) -> Result<PseudonymInTransit> {
        let domain = self.domain();
        let r = domain.random_scalar();
        let blinded = self.0.multiply_by_mod_inverse(&r)?;
        let claims = TransitClaims::new(&r, Utc::now(), domain.in_transit_ttl());
        let transit_info = TransitInfo::seal(domain, &claims)?;
        debug!(domain = %domain.key(), exp = claims.exp, "created pseudonym in transit");
        Ok(PseudonymInTransit::with_times(
            blinded,
            transit_info,
            Some(claims.iat),
            Some(claims.exp),
        ))
    }
}

impl fmt::Debug for PseudonymAtRest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// In transit
// ---------------------------------------------------------------------------

/// A randomized pseudonym carrying its encrypted transit info.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PseudonymInTransit {
    point: CurvePoint,
    transit_info: TransitInfo,
    iat: Option<i64>,
    exp: Option<i64>,
}

impl PseudonymInTransit {
    pub fn new(point: CurvePoint, transit_info: TransitInfo) -> Self {
        Self::with_times(point, transit_info, None, None)
    }

    /// Also record the `iat` / `exp` reported alongside the transit info.
    pub fn with_times(
        point: CurvePoint,
        transit_info: TransitInfo,
        iat: Option<i64>,
        exp: Option<i64>,
    ) -> Self {
        Self {
            point,
            transit_info,
            iat,
            exp,
        }
    }

    /// Parse `base64url(compressed SEC1):transitInfo`. Only the first `:`
    /// separates the two parts.
    pub fn parse(domain: &Arc<Domain>, text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(PseudoError::InvalidPseudonym(
                "the pseudonym in transit string is empty".to_string(),
            ));
        }
        let (sec1, transit_info) = text.split_once(IN_TRANSIT_SEPARATOR).ok_or_else(|| {
            PseudoError::InvalidPseudonym(format!(
                "missing `{IN_TRANSIT_SEPARATOR}` in the pseudonym in transit string: \
                 format must be {{sec1InBase64Url}}{IN_TRANSIT_SEPARATOR}{{transitInfo}}"
            ))
        })?;
        let point = CurvePoint::from_sec1_base64(domain, sec1, Base64Flavor::UrlSafeNoPad)?;
        Ok(Self::new(point, TransitInfo::new(transit_info)))
    }

    pub fn point(&self) -> &CurvePoint {
        &self.point
    }

    pub fn domain(&self) -> &Arc<Domain> {
        self.point.domain()
    }

    pub fn transit_info(&self) -> &TransitInfo {
        &self.transit_info
    }

    pub fn iat(&self) -> Option<i64> {
        self.iat
    }

    pub fn exp(&self) -> Option<i64> {
        self.exp
    }

    /// `base64url(compressed SEC1) ":" transitInfo`.
    pub fn as_string(&self) -> String {
        format!(
            "{}{}{}",
            self.point.sec1_compressed_base64(Base64Flavor::UrlSafeNoPad),
            IN_TRANSIT_SEPARATOR,
            self.transit_info.as_str()
        )
    }

    /// Check that the transit info is addressed to this pseudonym's domain.
    pub fn validate_header(&self) -> Result<()> {
        self.transit_info.validate_header(self.domain())
    }

    /// Recover the pseudonym at rest, rejecting expired or not yet valid
    /// transit infos.
    pub fn decrypt(&self) -> Result<PseudonymAtRest> {
        self.decrypt_with_validation(true)
    }

    /// Recover the pseudonym at rest: decrypt the transit info with the
    /// domain key named by its `kid`, then multiply by the sealed scalar.
    pub fn decrypt_with_validation(&self, validate_iat_and_exp: bool) -> Result<PseudonymAtRest> {
        let claims = self.transit_info.open(self.domain())?;
        if validate_iat_and_exp {
            claims.check_validity(Utc::now())?;
        }
        let scalar = claims.scalar()?;
        let point = self
            .point
            .multiply(&scalar)
            .map_err(|e| PseudoError::InvalidTransitInfo(format!("unusable scalar: {e}")))?;
        Ok(PseudonymAtRest(point))
    }
}

impl fmt::Display for PseudonymInTransit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl fmt::Debug for PseudonymInTransit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = |secs: Option<i64>| {
            secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "null".to_string())
        };
        write!(
            f,
            "{{\"x\": \"{}\", \"y\": \"{}\", \"domain\": \"{}\", \"transitInfo\": \"{}\", \"iat\": {}, \"exp\": {}}}",
            self.point.x(),
            self.point.y(),
            self.domain().key(),
            self.transit_info,
            stamp(self.iat),
            stamp(self.exp)
        )
    }
}
