//! # Curve Points
//!
//! Values and pseudonyms are points of their domain's curve. [`CurvePoint`]
//! is the shared representation: affine coordinates bound to a [`Domain`],
//! always validated to lie on the curve, with every serialization the
//! protocol and its users need:
//!
//! | Form                         | Method                                  |
//! |------------------------------|-----------------------------------------|
//! | integers                     | [`CurvePoint::x`], [`CurvePoint::y`]    |
//! | fixed-width big-endian bytes | [`CurvePoint::x_bytes`]                 |
//! | Base64 of the bytes          | [`CurvePoint::x_base64`]                |
//! | `x<sep>y` in Base64          | [`CurvePoint::x_and_y_base64_separated_by`] |
//! | SEC1 uncompressed / compressed | [`CurvePoint::sec1`], [`CurvePoint::sec1_compressed`] |
//!
//! Parsing lives in [`factory`]. Two points are equal when their coordinates
//! and their domain keys are.

pub mod factory;
pub mod pseudonym;
pub mod value;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use num_bigint::BigUint;

use crate::curve::{left_pad, Coordinates};
use crate::domain::Domain;
use crate::encoding::Base64Flavor;
use crate::error::Result;

/// A validated point of a domain's curve.
#[derive(Clone)]
pub struct CurvePoint {
    coordinates: Coordinates,
    domain: Arc<Domain>,
}

impl CurvePoint {
    /// Wrap coordinates already known to be on the curve.
    pub(crate) fn from_validated(domain: Arc<Domain>, coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            domain,
        }
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }

    pub fn x(&self) -> &BigUint {
        &self.coordinates.x
    }

    pub fn y(&self) -> &BigUint {
        &self.coordinates.y
    }

    /// `x` as a big-endian byte string of the curve's coordinate length.
    pub fn x_bytes(&self) -> Vec<u8> {
        self.fixed_width(&self.coordinates.x)
    }

    /// `y` as a big-endian byte string of the curve's coordinate length.
    pub fn y_bytes(&self) -> Vec<u8> {
        self.fixed_width(&self.coordinates.y)
    }

    pub fn x_base64(&self, flavor: Base64Flavor) -> String {
        flavor.encode(self.x_bytes())
    }

    pub fn y_base64(&self, flavor: Base64Flavor) -> String {
        flavor.encode(self.y_bytes())
    }

    /// Standard Base64 of `x` and `y` joined by `separator`.
    pub fn x_and_y_base64_separated_by(&self, separator: &str) -> String {
        format!(
            "{}{}{}",
            self.x_base64(Base64Flavor::Standard),
            separator,
            self.y_base64(Base64Flavor::Standard)
        )
    }

    /// Uncompressed SEC1 encoding: `04 || x || y`.
    pub fn sec1(&self) -> Vec<u8> {
        self.domain.curve().encode_sec1(&self.coordinates, false)
    }

    /// Compressed SEC1 encoding: `02 || x` for even `y`, `03 || x` for odd.
    pub fn sec1_compressed(&self) -> Vec<u8> {
        self.domain.curve().encode_sec1(&self.coordinates, true)
    }

    pub fn sec1_base64(&self, flavor: Base64Flavor) -> String {
        flavor.encode(self.sec1())
    }

    pub fn sec1_compressed_base64(&self, flavor: Base64Flavor) -> String {
        flavor.encode(self.sec1_compressed())
    }

    /// `k·P`, normalized.
    pub fn multiply(&self, scalar: &BigUint) -> Result<CurvePoint> {
        let coordinates = self.domain.curve().multiply(&self.coordinates, scalar)?;
        Ok(Self::from_validated(self.domain.clone(), coordinates))
    }

    /// `k⁻¹·P` where the inverse is taken modulo the group order.
    pub fn multiply_by_mod_inverse(&self, scalar: &BigUint) -> Result<CurvePoint> {
        let inverse = self.domain.curve().invert_scalar(scalar)?;
        self.multiply(&inverse)
    }

    /// The same coordinates, attached to another domain on the same curve.
    pub(crate) fn with_domain(&self, domain: Arc<Domain>) -> CurvePoint {
        Self::from_validated(domain, self.coordinates.clone())
    }

    fn fixed_width(&self, value: &BigUint) -> Vec<u8> {
        left_pad(&value.to_bytes_be(), self.domain.curve().coordinate_len())
    }
}

impl PartialEq for CurvePoint {
    fn eq(&self, other: &Self) -> bool {
        self.coordinates == other.coordinates && self.domain.key() == other.domain.key()
    }
}

impl Eq for CurvePoint {}

impl Hash for CurvePoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.coordinates.hash(state);
        self.domain.key().hash(state);
    }
}

impl fmt::Debug for CurvePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{\"x\": \"{}\", \"y\": \"{}\", \"domain\": \"{}\"}}",
            self.coordinates.x,
            self.coordinates.y,
            self.domain.key()
        )
    }
}
