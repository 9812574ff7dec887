//! # Blinding Engine
//!
//! Runs the three round trips with the pseudonymisation authority. Every
//! point leaving the process is first blinded by a fresh random scalar `r`
//! and every point coming back is unblinded by `r⁻¹`, so the authority never
//! sees a value or a pseudonym in the clear.
//!
//! ```text
//! pseudonymize   v      → v·r      → authority → v·r·s     → wrap (see below)
//! identify       P·t⁻¹  → P·t⁻¹·r  → authority → v·r       → ·r⁻¹ = v
//! convert_to     P      → P·r      → authority → P'·r      → ·r⁻¹ = P'
//! ```
//!
//! When the authority answers `pseudonymize` without its own transit info,
//! the result is kept blinded as `v·r·s` and `r⁻¹` is sealed in a transit
//! info under the domain's active key, so decrypting yields `v·s`.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Domain, DomainRegistry};
use crate::encoding::Base64Flavor;
use crate::error::{PseudoError, Result};
use crate::point::pseudonym::{Pseudonym, PseudonymAtRest, PseudonymInTransit};
use crate::point::value::Value;
use crate::point::CurvePoint;
use crate::transit::{TransitClaims, TransitInfo};

/// Request body sent to the authority.
#[derive(Debug, Serialize)]
struct Payload<'a> {
    id: String,
    crv: &'a str,
    x: String,
    y: String,
    #[serde(rename = "transitInfo", skip_serializing_if = "Option::is_none")]
    transit_info: Option<&'a str>,
}

impl<'a> Payload<'a> {
    fn new(point: &'a CurvePoint, transit_info: Option<&'a TransitInfo>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            crv: point.domain().crv(),
            x: point.x_base64(Base64Flavor::Standard),
            y: point.y_base64(Base64Flavor::Standard),
            transit_info: transit_info.map(TransitInfo::as_str),
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PseudoError::Crypto(format!("cannot serialize payload: {e}")))
    }
}

/// Response body returned by the authority.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorityResponse {
    domain: Option<String>,
    x: Option<String>,
    y: Option<String>,
    transit_info: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
}

impl AuthorityResponse {
    fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| PseudoError::InvalidResponse(format!("cannot parse the authority response: {e}")))
    }

    /// The returned point, which must belong to `expected`.
    fn point(&self, expected: &Arc<Domain>) -> Result<CurvePoint> {
        let domain = self
            .domain
            .as_deref()
            .ok_or_else(|| PseudoError::InvalidResponse("`domain` is missing".to_string()))?;
        if domain != expected.key() {
            return Err(PseudoError::InvalidResponse(format!(
                "`{domain}` does not match the expected domain `{}`",
                expected.key()
            )));
        }
        let (Some(x), Some(y)) = (self.x.as_deref(), self.y.as_deref()) else {
            return Err(PseudoError::InvalidResponse("`x` or `y` is missing".to_string()));
        };
        CurvePoint::from_xy_base64(expected, x, y, Base64Flavor::Standard)
            .map_err(|e| PseudoError::InvalidResponse(format!("invalid point: {e}")))
    }

    /// The authority's own transit info with its `iat` / `exp`, if it sent one.
    fn into_transit(self) -> Option<(TransitInfo, Option<i64>, Option<i64>)> {
        let transit_info = self.transit_info.filter(|t| !t.trim().is_empty())?;
        Some((TransitInfo::new(transit_info), self.iat, self.exp))
    }
}

/// Client side of the blind pseudonymisation protocol.
#[derive(Debug, Clone)]
pub struct BlindingEngine {
    registry: DomainRegistry,
}

impl BlindingEngine {
    pub fn new(registry: DomainRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    /// Pseudonymize `value` in its domain.
    pub fn pseudonymize(&self, value: &Value) -> Result<PseudonymInTransit> {
        let domain = value.domain();
        let r = domain.random_scalar();
        let blinded = value.point().multiply(&r)?;

        let payload = Payload::new(&blinded, None).to_json()?;
        let raw = self.registry.client().pseudonymize(domain.key(), &payload)?;
        let response = AuthorityResponse::parse(&raw)?;
        let point = response.point(domain)?;

        match response.into_transit() {
            Some((transit_info, iat, exp)) => {
                debug!(domain = %domain.key(), "authority sealed the transit info");
                let unblinded = point.multiply_by_mod_inverse(&r)?;
                Ok(PseudonymInTransit::with_times(unblinded, transit_info, iat, exp))
            }
            None => {
                let r_inv = domain.curve().invert_scalar(&r)?;
                let claims = TransitClaims::new(&r_inv, Utc::now(), domain.in_transit_ttl());
                let transit_info = TransitInfo::seal(domain, &claims)?;
                debug!(domain = %domain.key(), exp = claims.exp, "pseudonymized");
                Ok(PseudonymInTransit::with_times(
                    point,
                    transit_info,
                    Some(claims.iat),
                    Some(claims.exp),
                ))
            }
        }
    }

    /// Recover the value behind a pseudonym in transit.
    pub fn identify(&self, pseudonym: &PseudonymInTransit) -> Result<Value> {
        let domain = pseudonym.domain();
        let r = domain.random_scalar();
        let blinded = pseudonym.point().multiply(&r)?;

        let payload = Payload::new(&blinded, Some(pseudonym.transit_info())).to_json()?;
        let raw = self.registry.client().identify(domain.key(), &payload)?;
        let point = AuthorityResponse::parse(&raw)?.point(domain)?;
        debug!(domain = %domain.key(), "identified");
        Ok(Value::from_point(point.multiply_by_mod_inverse(&r)?))
    }

    /// Convert a pseudonym, at rest or in transit, to `to_domain`. The result
    /// is a pseudonym in transit of the target domain.
    pub fn convert_to(&self, pseudonym: &Pseudonym, to_domain: &str) -> Result<PseudonymInTransit> {
        let from = pseudonym.domain();
        let target = self.registry.domain_by_key(to_domain)?;
        let r = from.random_scalar();
        let blinded = pseudonym.point().multiply(&r)?;

        let payload = Payload::new(&blinded, pseudonym.transit_info()).to_json()?;
        let raw = self.registry.client().convert_to(from.key(), to_domain, &payload)?;
        let response = AuthorityResponse::parse(&raw)?;
        let converted = response.point(&target)?.multiply_by_mod_inverse(&r)?;
        debug!(from = %from.key(), to = %to_domain, "converted");

        match response.into_transit() {
            Some((transit_info, iat, exp)) => {
                Ok(PseudonymInTransit::with_times(converted, transit_info, iat, exp))
            }
            None => PseudonymAtRest::from_point(converted).create_pseudonym_in_transit(),
        }
    }

    /// Decrypt, rejecting expired or not yet valid transit infos.
    pub fn decrypt(&self, pseudonym: &PseudonymInTransit) -> Result<PseudonymAtRest> {
        pseudonym.decrypt()
    }

    pub fn decrypt_with_validation(
        &self,
        pseudonym: &PseudonymInTransit,
        validate_iat_and_exp: bool,
    ) -> Result<PseudonymAtRest> {
        pseudonym.decrypt_with_validation(validate_iat_and_exp)
    }

    pub fn create_pseudonym_in_transit(&self, pseudonym: &PseudonymAtRest) -> Result<PseudonymInTransit> {
        pseudonym.create_pseudonym_in_transit()
    }
}
