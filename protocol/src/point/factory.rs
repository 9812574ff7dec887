//! Parsing of curve points from their external representations.
//!
//! Every constructor validates that the point lies on the domain's curve and
//! reports failures as [`PseudoError::InvalidPseudonym`]. Wrap the result in
//! [`PseudonymAtRest`](crate::point::pseudonym::PseudonymAtRest) or
//! [`PseudonymInTransit`](crate::point::pseudonym::PseudonymInTransit) as
//! appropriate.

use std::sync::Arc;

use num_bigint::BigUint;

use crate::curve::Coordinates;
use crate::domain::Domain;
use crate::encoding::Base64Flavor;
use crate::error::{PseudoError, Result};
use crate::point::CurvePoint;

fn invalid(reason: impl Into<String>) -> PseudoError {
    PseudoError::InvalidPseudonym(reason.into())
}

fn decode_base64(text: &str, flavor: Base64Flavor, what: &str) -> Result<Vec<u8>> {
    if text.trim().is_empty() {
        return Err(invalid(format!("the Base64 encoded {what} is empty")));
    }
    flavor
        .decode(text)
        .map_err(|_| invalid(format!("the Base64 encoded {what} is not a valid Base64 string")))
}

impl CurvePoint {
    /// Build a point from its affine coordinates.
    pub fn from_xy(domain: &Arc<Domain>, x: BigUint, y: BigUint) -> Result<CurvePoint> {
        let coordinates = Coordinates { x, y };
        domain
            .curve()
            .validate(&coordinates)
            .map_err(|_| invalid("invalid coordinates"))?;
        Ok(CurvePoint::from_validated(domain.clone(), coordinates))
    }

    /// Build a point from big-endian unsigned coordinate bytes.
    pub fn from_xy_bytes(domain: &Arc<Domain>, x: &[u8], y: &[u8]) -> Result<CurvePoint> {
        if x.is_empty() || y.is_empty() {
            return Err(invalid("a coordinate is empty"));
        }
        Self::from_xy(domain, BigUint::from_bytes_be(x), BigUint::from_bytes_be(y))
    }

    /// Build a point from Base64 encoded coordinate bytes.
    pub fn from_xy_base64(
        domain: &Arc<Domain>,
        x: &str,
        y: &str,
        flavor: Base64Flavor,
    ) -> Result<CurvePoint> {
        let x = decode_base64(x, flavor, "X coordinate")?;
        let y = decode_base64(y, flavor, "Y coordinate")?;
        Self::from_xy_bytes(domain, &x, &y)
    }

    /// Parse `base64(x) <separator> base64(y)` (standard alphabet). The
    /// separator must appear exactly once.
    pub fn from_x_and_y_base64_separated_by(
        domain: &Arc<Domain>,
        text: &str,
        separator: char,
    ) -> Result<CurvePoint> {
        if text.trim().is_empty() {
            return Err(invalid("pseudonym is empty"));
        }
        let mut parts = text.split(separator);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(x), Some(y), None) => Self::from_xy_base64(domain, x, y, Base64Flavor::Standard),
            _ => Err(invalid(format!("X and Y are not separated by `{separator}`"))),
        }
    }

    /// Parse a SEC1 encoded point, compressed (`02`/`03`) or uncompressed (`04`).
    pub fn from_sec1(domain: &Arc<Domain>, bytes: &[u8]) -> Result<CurvePoint> {
        if bytes.is_empty() {
            return Err(invalid("the SEC1 representation of the point is empty"));
        }
        let coordinates = domain
            .curve()
            .decode_sec1(bytes)
            .map_err(|_| invalid(format!("invalid SEC1 representation of the point ({} bytes)", bytes.len())))?;
        Ok(CurvePoint::from_validated(domain.clone(), coordinates))
    }

    /// Parse a Base64 encoded SEC1 point.
    pub fn from_sec1_base64(
        domain: &Arc<Domain>,
        text: &str,
        flavor: Base64Flavor,
    ) -> Result<CurvePoint> {
        let bytes = decode_base64(text, flavor, "SEC1 representation of the point")?;
        Self::from_sec1(domain, &bytes)
    }
}
